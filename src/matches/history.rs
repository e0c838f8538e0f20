//! Per-user result ledger. Entries are written inside the completing transaction,
//! keyed by match id, so a retried completion rewrites the same document.

use crate::error::PvpError;
use crate::ids::{MatchId, UserId};
use crate::matches::match_types::{Outcome, Roster, SessionStatus, SyncMatch, WinnerReason};
use crate::matches::service::PvpService;
use crate::store::{paths, DocumentStore, StoreError, Transaction};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Sync,
    Async,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

fn default_winner_reason() -> WinnerReason {
    WinnerReason::Tie
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub session_id: MatchId,
    #[serde(default)]
    pub match_type: MatchType,
    pub opponent_uid: Option<UserId>,
    pub opponent_display_name: Option<String>,
    pub opponent_email: Option<String>,
    pub my_score: u32,
    pub my_total: u32,
    pub my_time_taken_seconds: f64,
    pub opponent_score: u32,
    pub opponent_total: u32,
    pub opponent_time_taken_seconds: f64,
    pub winner_uid: Option<UserId>,
    #[serde(default = "default_winner_reason")]
    pub winner_reason: WinnerReason,
    pub outcome: MatchOutcome,
    pub completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn sort_key(&self) -> (Reverse<DateTime<Utc>>, Reverse<String>) {
        (Reverse(self.completed_at), Reverse(self.session_id.to_string()))
    }

    fn cursor(&self) -> String {
        format!(
            "{}|{}",
            self.completed_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.session_id
        )
    }
}

/// The ledger entry for `me`, taken from the completed match snapshot.
pub fn build_history_entry(
    match_id: MatchId,
    match_type: MatchType,
    roster: &Roster,
    question_count: usize,
    outcome: &Outcome,
    me: &UserId,
    completed_at: DateTime<Utc>,
) -> HistoryEntry {
    let opponent_uid = roster.opponent_of(me).cloned();
    let mine = roster.player(me);
    let theirs = opponent_uid.as_ref().and_then(|uid| roster.player(uid));
    let default_total = question_count as u32;

    let outcome_for_me = match &outcome.winner_uid {
        None => MatchOutcome::Draw,
        Some(winner) if winner == me => MatchOutcome::Win,
        Some(_) => MatchOutcome::Loss,
    };

    HistoryEntry {
        session_id: match_id,
        match_type,
        opponent_display_name: theirs.and_then(|x| x.display_name.clone()),
        opponent_email: theirs.and_then(|x| x.email.clone()),
        opponent_uid,
        my_score: mine.and_then(|x| x.score).unwrap_or(0),
        my_total: mine.and_then(|x| x.total).unwrap_or(default_total),
        my_time_taken_seconds: mine.and_then(|x| x.time_taken_seconds).unwrap_or(0.0),
        opponent_score: theirs.and_then(|x| x.score).unwrap_or(0),
        opponent_total: theirs.and_then(|x| x.total).unwrap_or(default_total),
        opponent_time_taken_seconds: theirs.and_then(|x| x.time_taken_seconds).unwrap_or(0.0),
        winner_uid: outcome.winner_uid.clone(),
        winner_reason: outcome.winner_reason,
        outcome: outcome_for_me,
        completed_at,
    }
}

/// Stages one entry per participant in `tx`.
pub fn record_history(
    tx: &mut Transaction<'_>,
    match_id: MatchId,
    match_type: MatchType,
    roster: &Roster,
    question_count: usize,
    outcome: &Outcome,
    completed_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    for uid in &roster.participant_ids {
        let entry = build_history_entry(
            match_id,
            match_type,
            roster,
            question_count,
            outcome,
            uid,
            completed_at,
        );
        tx.set(&paths::history_entry(uid, &match_id), &entry)?;
    }

    Ok(())
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

fn parse_cursor(cursor: &str) -> Result<(DateTime<Utc>, String), PvpError> {
    let invalid = || PvpError::Validation(format!("invalid history cursor '{}'", cursor));

    let (completed_at, match_id) = cursor.split_once('|').ok_or_else(invalid)?;
    let completed_at = DateTime::parse_from_rfc3339(completed_at)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let match_id = MatchId::parse(match_id).ok_or_else(invalid)?;

    Ok((completed_at, match_id.to_string()))
}

/// Newest first. Ledger entries win over entries derived from completed sync matches.
pub fn list_history(
    store: &DocumentStore,
    uid: &UserId,
    limit: usize,
    cursor: Option<&str>,
) -> Result<HistoryPage, PvpError> {
    let after = cursor.map(parse_cursor).transpose()?;

    let mut merged: BTreeMap<MatchId, HistoryEntry> = BTreeMap::new();
    for (_, entry) in store.list::<HistoryEntry>(&paths::history_collection(uid))? {
        merged.insert(entry.session_id, entry);
    }

    for (_, sync_match) in store.list::<SyncMatch>(paths::SYNC_MATCHES)? {
        if sync_match.status != SessionStatus::Completed
            || !sync_match.roster.contains(uid)
            || merged.contains_key(&sync_match.id)
        {
            continue;
        }

        let outcome = sync_match.outcome().unwrap_or(Outcome {
            winner_uid: sync_match.winner_uid.clone(),
            winner_reason: WinnerReason::Tie,
        });
        let entry = build_history_entry(
            sync_match.id,
            MatchType::Sync,
            &sync_match.roster,
            sync_match.questions.len(),
            &outcome,
            uid,
            sync_match.completed_at.unwrap_or(sync_match.created_at),
        );
        merged.insert(sync_match.id, entry);
    }

    let mut entries: Vec<HistoryEntry> = merged
        .into_values()
        .filter(|entry| match &after {
            None => true,
            Some((at, id)) => {
                entry.completed_at < *at
                    || (entry.completed_at == *at && entry.session_id.to_string() < *id)
            }
        })
        .collect();
    entries.sort_by_key(HistoryEntry::sort_key);

    let has_more = entries.len() > limit;
    entries.truncate(limit);
    let next_cursor = if has_more {
        entries.last().map(HistoryEntry::cursor)
    } else {
        None
    };

    Ok(HistoryPage {
        history: entries,
        next_cursor,
        has_more,
    })
}

impl PvpService {
    pub fn history(
        &self,
        uid: &UserId,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, PvpError> {
        list_history(&self.store, uid, clamp_limit(limit), cursor)
    }
}
