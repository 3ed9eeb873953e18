//! Iterative GETBULK walk (§4.6): scope-filtered pagination with a
//! `max_entries` cap. Duplicate suppression is deliberately NOT performed —
//! callers that care uniq after the fact (§4.6, §8 testable property notes).

use crate::config::Options;
use crate::error::SnmpError;
use crate::oid::OidSource;
use crate::ops::Ops;
use crate::target::Target;
use crate::varbind::VarBind;

/// `opts.adaptive_tuning` (§6) hands the walk off to `adaptive_walk` instead
/// of running with a fixed `opts.max_repetitions`; a `bulk_walk` caller that
/// sets the flag gets feedback-tuned repetition counts without switching
/// functions.
pub async fn bulk_walk(
    ops: &Ops,
    target: &Target,
    root: OidSource<'_>,
    opts: &Options,
) -> Result<Vec<VarBind>, (Vec<VarBind>, SnmpError)> {
    if opts.adaptive_tuning {
        return crate::adaptive_walk::adaptive_walk(ops, target, root, opts).await;
    }

    let root = crate::oid::normalize(root, ops.mib.as_ref()).map_err(|e| (Vec::new(), e))?;
    let mut cursor = root.clone();
    let mut acc = Vec::new();
    let mut remaining_budget = opts.max_entries;

    loop {
        if remaining_budget == 0 {
            return Ok(acc);
        }

        let max_repetitions = opts.max_repetitions.min(remaining_budget as u32);
        let mut step_opts = opts.clone();
        step_opts.max_repetitions = max_repetitions;

        let response = match ops
            .get_bulk(target, OidSource::Resolved(cursor.clone()), &step_opts)
            .await
        {
            Ok(r) => r,
            Err(e) => return Err((acc, e)),
        };

        if response.is_empty() {
            return Ok(acc);
        }

        let in_scope: Vec<VarBind> = response
            .iter()
            .take_while(|vb| root.is_prefix_of(&vb.oid) && !vb.value.is_exception())
            .cloned()
            .collect();

        if in_scope.is_empty() {
            return Ok(acc);
        }

        let last_oid = in_scope.last().unwrap().oid.clone();
        let made_progress = last_oid.compare(&cursor) == std::cmp::Ordering::Greater;

        remaining_budget = remaining_budget.saturating_sub(in_scope.len());
        acc.extend(in_scope);

        if !made_progress {
            return Ok(acc);
        }
        cursor = last_oid;

        let last_of_whole_response = &response[response.len() - 1];
        if !root.is_prefix_of(&last_of_whole_response.oid) || last_of_whole_response.value.is_exception() {
            return Ok(acc);
        }
    }
}
