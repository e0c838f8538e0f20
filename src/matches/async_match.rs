use crate::error::{ConflictKind, PvpError};
use crate::ids::{MatchId, UserId};
use crate::matches::history::{record_history, MatchType};
use crate::matches::match_types::{AsyncInboxEntry, AsyncMatch, AsyncMatchStatus, Submission};
use crate::matches::scoring::resolve_winner;
use crate::matches::service::PvpService;
use crate::store::{paths, Transaction};
use chrono::{DateTime, Utc};
use log::{info, warn};

pub const INBOX_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitEffect {
    Unchanged,
    Recorded,
    Completed,
    Closed,
}

impl PvpService {
    pub fn get_async(&self, id: &MatchId, caller: &UserId) -> Result<AsyncMatch, PvpError> {
        let now = self.now();

        self.store.run_transaction(|tx| {
            let (found, _) = load_and_expire(tx, id, now)?;
            found.roster.require_participant(caller)?;

            Ok(found)
        })
    }

    /// Stamps the caller's own start time. The opponent and the match status are untouched.
    pub fn start_async(&self, id: &MatchId, caller: &UserId) -> Result<AsyncMatch, PvpError> {
        let now = self.now();

        self.store.run_transaction(|tx| {
            let (mut found, _) = load_and_expire(tx, id, now)?;
            found.roster.require_participant(caller)?;
            if found.status.is_terminal() {
                return Ok(found);
            }

            let Some(player) = found.roster.players.get_mut(caller) else {
                return Err(PvpError::Forbidden);
            };
            if player.started_at.is_none() {
                player.started_at = Some(now);
                tx.set(&paths::async_match(id), &found)?;
            }

            Ok(found)
        })
    }

    pub fn submit_async(
        &self,
        id: &MatchId,
        caller: &UserId,
        submission: &Submission,
    ) -> Result<AsyncMatch, PvpError> {
        submission.validate()?;
        let now = self.now();

        let (found, effect) = self
            .store
            .run_transaction(|tx| apply_async_submission(tx, id, caller, submission, now))?;

        match effect {
            SubmitEffect::Closed => Err(PvpError::Conflict(ConflictKind::MatchClosed)),
            SubmitEffect::Completed => {
                info!(
                    "Async match {} completed, winner {:?} by {:?}",
                    id, found.winner_uid, found.winner_reason
                );
                Ok(found)
            }
            SubmitEffect::Recorded | SubmitEffect::Unchanged => Ok(found),
        }
    }

    /// Closes one overdue match. No participant check; meant for schedulers.
    pub fn expire_async(&self, id: &MatchId) -> Result<AsyncMatch, PvpError> {
        self.close_overdue(id).map(|(found, _)| found)
    }

    /// The flag is `true` only if this call did the closing.
    fn close_overdue(&self, id: &MatchId) -> Result<(AsyncMatch, bool), PvpError> {
        let now = self.now();

        let (found, expired) = self
            .store
            .run_transaction(|tx| load_and_expire(tx, id, now))?;
        if expired {
            info!("Async match {} closed as {:?}", id, found.status);
        }

        Ok((found, expired))
    }

    /// Closes every match past its deadline. Returns how many were closed.
    pub fn expire_overdue(&self) -> Result<usize, PvpError> {
        let now = self.now();
        let overdue: Vec<MatchId> = self
            .store
            .list::<AsyncMatch>(paths::ASYNC_MATCHES)?
            .into_iter()
            .filter(|(_, found)| found.is_overdue(now))
            .map(|(_, found)| found.id)
            .collect();

        let mut closed = 0;
        for id in overdue {
            match self.close_overdue(&id) {
                Ok((_, true)) => closed += 1,
                Ok(_) => {}
                Err(err) => warn!("Could not expire async match {}: {}", id, err),
            }
        }

        Ok(closed)
    }

    /// Live and completed matches for the caller, newest first.
    pub fn async_inbox(&self, caller: &UserId) -> Result<Vec<AsyncInboxEntry>, PvpError> {
        let now = self.now();
        let mut mine: Vec<AsyncMatch> = self
            .store
            .list::<AsyncMatch>(paths::ASYNC_MATCHES)?
            .into_iter()
            .map(|(_, found)| found)
            .filter(|found| found.roster.contains(caller))
            .collect();

        for found in mine.iter_mut().filter(|x| x.is_overdue(now)) {
            *found = self.expire_async(&found.id)?;
        }

        mine.retain(|x| {
            matches!(
                x.status,
                AsyncMatchStatus::Open | AsyncMatchStatus::AwaitingOpponent | AsyncMatchStatus::Completed
            )
        });
        mine.sort_by_key(|x| std::cmp::Reverse(x.created_at));
        mine.truncate(INBOX_LIMIT);

        Ok(mine
            .iter()
            .map(|found| AsyncInboxEntry::for_viewer(found, caller))
            .collect())
    }
}

/// Moves an overdue match to its closed state. Returns `true` if anything changed.
///
/// One submission on the books means the other player forfeits; none means
/// nobody played and the match simply expires. Neither writes a winner.
pub(crate) fn close_if_overdue(found: &mut AsyncMatch, now: DateTime<Utc>) -> bool {
    if !found.is_overdue(now) {
        return false;
    }

    let pending: Vec<&UserId> = found
        .roster
        .participant_ids
        .iter()
        .filter(|uid| !found.roster.has_submitted(uid))
        .collect();

    match (found.roster.submitted_count(), pending.as_slice()) {
        (1, [absent]) => {
            found.forfeited_by = Some((*absent).clone());
            found.status = AsyncMatchStatus::Forfeited;
        }
        _ => found.status = AsyncMatchStatus::Expired,
    }

    true
}

fn load_and_expire(
    tx: &mut Transaction<'_>,
    id: &MatchId,
    now: DateTime<Utc>,
) -> Result<(AsyncMatch, bool), PvpError> {
    let path = paths::async_match(id);
    let mut found: AsyncMatch = tx.get(&path)?.ok_or(PvpError::NotFound("Match"))?;

    let expired = close_if_overdue(&mut found, now);
    if expired {
        tx.set(&path, &found)?;
    }

    Ok((found, expired))
}

pub(crate) fn apply_async_submission(
    tx: &mut Transaction<'_>,
    id: &MatchId,
    caller: &UserId,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<(AsyncMatch, SubmitEffect), PvpError> {
    let (mut found, _) = load_and_expire(tx, id, now)?;
    found.roster.require_participant(caller)?;
    if found.status.is_terminal() {
        return Ok((found, SubmitEffect::Closed));
    }

    let recorded = found
        .roster
        .record_submission(caller, &found.questions, submission, now)?;
    if !recorded {
        return Ok((found, SubmitEffect::Unchanged));
    }
    if let Some(player) = found.roster.players.get_mut(caller) {
        player.started_at.get_or_insert(now);
    }

    let mut effect = SubmitEffect::Recorded;
    match found.roster.pair_ids() {
        Some((first, second)) if found.roster.both_submitted() => {
            let outcome = resolve_winner(first, second, &found.roster.players);

            record_history(
                tx,
                found.id,
                MatchType::Async,
                &found.roster,
                found.questions.len(),
                &outcome,
                now,
            )?;

            found.winner_uid = outcome.winner_uid;
            found.winner_reason = Some(outcome.winner_reason);
            found.completed_at = Some(now);
            found.status = AsyncMatchStatus::Completed;
            effect = SubmitEffect::Completed;
        }
        _ => found.status = AsyncMatchStatus::AwaitingOpponent,
    }

    tx.set(&paths::async_match(id), &found)?;

    Ok((found, effect))
}
