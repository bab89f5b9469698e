//! Reputation and conquest: the standings a resolution settles and the
//! members that move into the winning tribe.
//!
//! Both are plans. A store backend applies them together in
//! [`JoustStore::settle_contest`](crate::store::JoustStore::settle_contest).

use std::collections::BTreeMap;

use crate::resolution::{member_share, Resolution};
use crate::store::{AgentId, Migration, Outcome, StoreResult, TribeId, TribeStanding};

/// Each tribe's delta and the share its members receive.
pub fn standings(resolution: &Resolution) -> Vec<TribeStanding> {
    resolution
        .tribes
        .iter()
        .map(|result| TribeStanding {
            tribe_id: result.tribe_id.clone(),
            delta: result.delta_infamy,
            member_delta: member_share(result.delta_infamy),
            outcome: Outcome::from_win(result.on_winning_side),
        })
        .collect()
}

/// One member moving into the conquering tribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub agent_id: AgentId,
    pub from: TribeId,
}

/// Members of every other contest tribe move into `conqueror`.
///
/// Join policies are not consulted. Without a conqueror nothing moves.
/// `members_of` reads a tribe's membership before any transfer.
pub fn plan_migration<F>(
    tribe_ids: &[TribeId],
    conqueror: Option<&str>,
    mut members_of: F,
) -> StoreResult<(Vec<Transfer>, Migration)>
where
    F: FnMut(&str) -> StoreResult<Vec<AgentId>>,
{
    let Some(conqueror) = conqueror else {
        return Ok((Vec::new(), Migration::default()));
    };

    let mut transfers = Vec::new();
    let mut moved_from_tribes = BTreeMap::new();
    let mut moved_total = 0;

    for from in tribe_ids.iter().filter(|id| id.as_str() != conqueror) {
        let members = members_of(from)?;
        if members.is_empty() {
            continue;
        }
        let moved = members.len() as u32;
        transfers.extend(members.into_iter().map(|agent_id| Transfer {
            agent_id,
            from: from.clone(),
        }));
        moved_from_tribes.insert(from.clone(), moved);
        moved_total += moved;
    }

    Ok((
        transfers,
        Migration {
            winner_tribe_id: Some(conqueror.to_string()),
            moved_total,
            moved_from_tribes,
        },
    ))
}
