//! Concurrent SNMP v1/v2c manager-side client (see `README.md`): a single
//! UDP socket shared by every in-flight request, correlated by request-id,
//! with iterative and adaptive-bulk walks, multi-target fan-out, per-target
//! circuit breakers, and a router across multiple engine instances.

pub mod adaptive_walk;
pub mod breaker;
pub mod bulk_walk;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod idgen;
pub mod logging;
pub mod mib;
pub mod monitor;
pub mod multi;
pub mod oid;
pub mod ops;
pub mod router;
pub mod socket;
pub mod table;
pub mod target;
pub mod varbind;
pub mod walk;

pub use adaptive_walk::{adaptive_walk, benchmark_device, BenchmarkResult};
pub use breaker::{Admission, BreakerParams, CircuitBreaker, Phase as BreakerPhase};
pub use bulk_walk::bulk_walk;
pub use codec::Version;
pub use config::{Config, LogOpt, Options, Overrides};
pub use engine::{Engine, EngineStats};
pub use error::{DeviceErrorAtom, ErrorKind, SnmpError};
pub use mib::{BuiltinMibResolver, MibResolver};
pub use monitor::{monitor, Change, MonitorHandle, MonitorTarget};
pub use multi::{
    execute as execute_multi, MultiError, MultiOp, MultiOutcome, MultiRequest, MultiResult, MultiResults, ReturnFormat,
    Strategy,
};
pub use oid::{normalize as normalize_oid, Oid, OidSource};
pub use ops::Ops;
pub use router::{EngineDescriptor, Health, Router, RouterParams, Strategy as RouterStrategy};
pub use socket::{Socket, SocketHealth, SocketStats};
pub use table::{ColumnStats, TableView};
pub use target::{Target, TargetHost};
pub use varbind::{VarBind, Value, VarType};
pub use walk::{walk, walk_table};
