use crate::error::{ConflictKind, PvpError};
use crate::ids::{ChallengeId, MatchId, UserId};
use crate::matches::scoring;
use crate::quiz::Question;
use crate::store::directory::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAX_PARTICIPANTS: usize = 2;

/// Question id -> chosen choice index.
pub type SelectedAnswers = BTreeMap<String, u32>;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Ready,
    InProgress,
    Completed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AsyncMatchStatus {
    Open,
    AwaitingOpponent,
    Completed,
    Expired,
    Forfeited,
}

impl AsyncMatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AsyncMatchStatus::Completed | AsyncMatchStatus::Expired | AsyncMatchStatus::Forfeited
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WinnerReason {
    Score,
    Time,
    Tie,
}

/// `winner_uid == None` is a draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub winner_uid: Option<UserId>,
    pub winner_reason: WinnerReason,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub uid: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_answers: Option<SelectedAnswers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_seconds: Option<f64>,
}

impl PlayerEntry {
    pub fn join(identity: &Identity, now: DateTime<Utc>) -> Self {
        PlayerEntry {
            uid: identity.uid.clone(),
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
            joined_at: now,
            started_at: None,
            submitted_at: None,
            selected_answers: None,
            score: None,
            total: None,
            time_taken_seconds: None,
        }
    }

    pub fn has_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }
}

/// Who is in a match. Insertion order decides "first" and "second" for tie-breaks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub participant_ids: Vec<UserId>,
    pub players: BTreeMap<UserId, PlayerEntry>,
}

impl Roster {
    pub fn solo(player: PlayerEntry) -> Self {
        let mut roster = Roster::default();
        roster.participant_ids.push(player.uid.clone());
        roster.players.insert(player.uid.clone(), player);
        roster
    }

    pub fn pair(first: PlayerEntry, second: PlayerEntry) -> Self {
        let mut roster = Roster::solo(first);
        roster.participant_ids.push(second.uid.clone());
        roster.players.insert(second.uid.clone(), second);
        roster
    }

    pub fn contains(&self, uid: &UserId) -> bool {
        self.participant_ids.contains(uid)
    }

    pub fn require_participant(&self, uid: &UserId) -> Result<(), PvpError> {
        if self.contains(uid) {
            Ok(())
        } else {
            Err(PvpError::Forbidden)
        }
    }

    pub fn is_full(&self) -> bool {
        self.participant_ids.len() >= MAX_PARTICIPANTS
    }

    pub fn add(&mut self, player: PlayerEntry) -> Result<(), ConflictKind> {
        if self.is_full() {
            return Err(ConflictKind::MatchFull);
        }

        self.participant_ids.push(player.uid.clone());
        self.players.insert(player.uid.clone(), player);
        Ok(())
    }

    pub fn pair_ids(&self) -> Option<(&UserId, &UserId)> {
        match self.participant_ids.as_slice() {
            [first, second] => Some((first, second)),
            _ => None,
        }
    }

    pub fn opponent_of(&self, uid: &UserId) -> Option<&UserId> {
        self.participant_ids.iter().find(|x| *x != uid)
    }

    pub fn player(&self, uid: &UserId) -> Option<&PlayerEntry> {
        self.players.get(uid)
    }

    pub fn has_submitted(&self, uid: &UserId) -> bool {
        self.player(uid).is_some_and(PlayerEntry::has_submitted)
    }

    pub fn submitted_count(&self) -> usize {
        self.participant_ids
            .iter()
            .filter(|uid| self.has_submitted(uid))
            .count()
    }

    pub fn both_submitted(&self) -> bool {
        self.pair_ids()
            .is_some_and(|(first, second)| self.has_submitted(first) && self.has_submitted(second))
    }

    /// Write-once: returns `false` without touching anything if `uid` already submitted.
    pub fn record_submission(
        &mut self,
        uid: &UserId,
        questions: &[Question],
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<bool, PvpError> {
        let player = self.players.get_mut(uid).ok_or(PvpError::Forbidden)?;
        if player.has_submitted() {
            return Ok(false);
        }

        player.score = Some(scoring::compute_score(questions, &submission.selected_answers));
        player.total = Some(questions.len() as u32);
        player.selected_answers = Some(submission.selected_answers.clone());
        player.time_taken_seconds = Some(submission.time_taken_seconds);
        player.submitted_at = Some(now);

        Ok(true)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub selected_answers: SelectedAnswers,
    pub time_taken_seconds: f64,
}

impl Submission {
    pub fn validate(&self) -> Result<(), PvpError> {
        if !self.time_taken_seconds.is_finite() || self.time_taken_seconds < 0.0 {
            return Err(PvpError::Validation(String::from(
                "timeTakenSeconds must be a non-negative number",
            )));
        }

        Ok(())
    }
}

/// Both players online in the same window.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMatch {
    pub id: MatchId,
    pub status: SessionStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub roster: Roster,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner_uid: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_reason: Option<WinnerReason>,
}

impl SyncMatch {
    pub fn open_lobby(creator: &Identity, now: DateTime<Utc>) -> Self {
        SyncMatch {
            id: MatchId::new(),
            status: SessionStatus::Waiting,
            created_by: creator.uid.clone(),
            created_at: now,
            roster: Roster::solo(PlayerEntry::join(creator, now)),
            questions: Vec::new(),
            started_at: None,
            completed_at: None,
            winner_uid: None,
            winner_reason: None,
        }
    }

    /// Both players pre-assigned, questions deferred to start.
    pub fn from_challenge(challenger: &Identity, challenged: &Identity, now: DateTime<Utc>) -> Self {
        SyncMatch {
            status: SessionStatus::Ready,
            roster: Roster::pair(
                PlayerEntry::join(challenger, now),
                PlayerEntry::join(challenged, now),
            ),
            ..SyncMatch::open_lobby(challenger, now)
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.winner_reason.map(|winner_reason| Outcome {
            winner_uid: self.winner_uid.clone(),
            winner_reason,
        })
    }
}

/// Players act independently, possibly days apart, until `expires_at`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AsyncMatch {
    pub id: MatchId,
    pub challenge_id: ChallengeId,
    pub status: AsyncMatchStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub roster: Roster,
    pub questions: Vec<Question>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner_uid: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_reason: Option<WinnerReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forfeited_by: Option<UserId>,
}

impl AsyncMatch {
    pub fn from_challenge(
        challenge_id: ChallengeId,
        challenger: &Identity,
        challenged: &Identity,
        questions: Vec<Question>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        AsyncMatch {
            id: MatchId::new(),
            challenge_id,
            status: AsyncMatchStatus::Open,
            created_by: challenger.uid.clone(),
            created_at: now,
            roster: Roster::pair(
                PlayerEntry::join(challenger, now),
                PlayerEntry::join(challenged, now),
            ),
            questions,
            expires_at,
            completed_at: None,
            winner_uid: None,
            winner_reason: None,
            forfeited_by: None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now >= self.expires_at
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AsyncInboxEntry {
    pub id: MatchId,
    pub challenge_id: ChallengeId,
    pub status: AsyncMatchStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub opponent_uid: Option<UserId>,
    pub opponent_display_name: Option<String>,
    pub opponent_email: Option<String>,
    pub my_submitted: bool,
    pub opponent_submitted: bool,
    pub winner_uid: Option<UserId>,
}

impl AsyncInboxEntry {
    pub fn for_viewer(async_match: &AsyncMatch, viewer: &UserId) -> Self {
        let opponent_uid = async_match.roster.opponent_of(viewer).cloned();
        let opponent = opponent_uid
            .as_ref()
            .and_then(|uid| async_match.roster.player(uid));

        AsyncInboxEntry {
            id: async_match.id,
            challenge_id: async_match.challenge_id,
            status: async_match.status,
            created_at: async_match.created_at,
            expires_at: async_match.expires_at,
            opponent_display_name: opponent.and_then(|x| x.display_name.clone()),
            opponent_email: opponent.and_then(|x| x.email.clone()),
            my_submitted: async_match.roster.has_submitted(viewer),
            opponent_submitted: opponent.is_some_and(PlayerEntry::has_submitted),
            opponent_uid,
            winner_uid: async_match.winner_uid.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: &str) -> Identity {
        Identity::new(UserId::from(uid), Some(uid.to_uppercase()), None)
    }

    #[test]
    fn test_roster_never_exceeds_two() {
        let now = Utc::now();
        let mut roster = Roster::solo(PlayerEntry::join(&identity("a"), now));

        assert!(roster.add(PlayerEntry::join(&identity("b"), now)).is_ok());
        assert_eq!(
            roster.add(PlayerEntry::join(&identity("c"), now)),
            Err(ConflictKind::MatchFull)
        );
        assert_eq!(roster.participant_ids.len(), 2);
        assert!(!roster.contains(&UserId::from("c")));
    }

    #[test]
    fn test_submission_is_write_once() {
        let now = Utc::now();
        let a = UserId::from("a");
        let mut roster = Roster::pair(
            PlayerEntry::join(&identity("a"), now),
            PlayerEntry::join(&identity("b"), now),
        );
        let first = Submission {
            selected_answers: SelectedAnswers::new(),
            time_taken_seconds: 12.0,
        };
        let second = Submission {
            selected_answers: SelectedAnswers::new(),
            time_taken_seconds: 99.0,
        };

        assert!(roster.record_submission(&a, &[], &first, now).unwrap());
        assert!(!roster.record_submission(&a, &[], &second, now).unwrap());
        assert_eq!(roster.player(&a).unwrap().time_taken_seconds, Some(12.0));
        assert!(!roster.both_submitted());
        assert_eq!(roster.submitted_count(), 1);
    }

    #[test]
    fn test_negative_time_is_rejected() {
        let submission = Submission {
            selected_answers: SelectedAnswers::new(),
            time_taken_seconds: -1.0,
        };

        assert!(matches!(submission.validate(), Err(PvpError::Validation(_))));
    }

    #[test]
    fn test_sync_match_serializes_flat_roster() {
        let lobby = SyncMatch::open_lobby(&identity("a"), Utc::now());
        let json = serde_json::to_value(&lobby).unwrap();

        assert_eq!(json["status"], "waiting");
        assert_eq!(json["participantIds"][0], "a");
        assert_eq!(json["players"]["a"]["displayName"], "A");
        assert!(json["winnerUid"].is_null());

        let back: SyncMatch = serde_json::from_value(json).unwrap();
        assert_eq!(back, lobby);
    }
}
