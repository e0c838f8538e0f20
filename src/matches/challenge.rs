//! Friend challenges. Accepting one is the only way to open an async match and
//! one of two ways to open a sync session.

use crate::error::{ConflictKind, PvpError};
use crate::ids::{ChallengeId, MatchId, UserId};
use crate::matches::match_types::{AsyncMatch, SyncMatch};
use crate::matches::service::PvpService;
use crate::quiz::Question;
use crate::store::directory::{load_identity, resolve_identity, set_active_match, Identity};
use crate::store::{paths, Transaction};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

pub const CHALLENGE_INBOX_LIMIT: usize = 50;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeMode {
    #[default]
    Sync,
    Async,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: ChallengeId,
    pub challenger_uid: UserId,
    pub challenged_uid: UserId,
    pub challenger_display_name: Option<String>,
    pub challenged_display_name: Option<String>,
    #[serde(default)]
    pub mode: ChallengeMode,
    pub status: ChallengeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    #[serde(alias = "pvpSessionId")]
    pub match_id: Option<MatchId>,
}

impl Challenge {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == ChallengeStatus::Pending && now < self.expires_at
    }

    fn respond(&mut self, status: ChallengeStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        self.responded_at = Some(now);
    }
}

/// At most one pending challenge per unordered pair of users.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct ChallengePair {
    pending_challenge_id: Option<ChallengeId>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInbox {
    pub incoming: Vec<Challenge>,
    pub outgoing: Vec<Challenge>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedChallenge {
    pub challenge: Challenge,
    pub challenger_uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<MatchId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
}

enum Response<T> {
    Applied(T),
    Lapsed,
}

impl PvpService {
    pub fn create_challenge(
        &self,
        caller: &Identity,
        challenged_uid: &UserId,
        mode: ChallengeMode,
    ) -> Result<Challenge, PvpError> {
        let challenged_uid = UserId::from(challenged_uid.as_str().trim());
        if challenged_uid.as_str().is_empty() {
            return Err(PvpError::Validation(String::from("challengedUid is required")));
        }
        if challenged_uid == caller.uid {
            return Err(PvpError::Validation(String::from("You cannot challenge yourself.")));
        }
        if !self.relationships.are_friends(&caller.uid, &challenged_uid)?
            || self.relationships.has_block(&caller.uid, &challenged_uid)?
        {
            return Err(PvpError::Forbidden);
        }

        let now = self.now();
        let expires_at = self.settings.challenge_deadline(now)?;

        let challenge = self.store.run_transaction(|tx| -> Result<_, PvpError> {
            let pair_path = paths::challenge_pair(&caller.uid, &challenged_uid);
            let pair: ChallengePair = tx.get(&pair_path)?.unwrap_or_default();
            if let Some(pending_id) = pair.pending_challenge_id {
                let existing: Option<Challenge> = tx.get(&paths::challenge(&pending_id))?;
                match existing {
                    Some(existing) if existing.is_live(now) => {
                        return Err(PvpError::Conflict(ConflictKind::DuplicateChallenge));
                    }
                    Some(mut existing) if existing.status == ChallengeStatus::Pending => {
                        existing.respond(ChallengeStatus::Expired, now);
                        tx.set(&paths::challenge(&pending_id), &existing)?;
                    }
                    _ => {}
                }
            }

            let challenger = resolve_identity(tx, caller)?;
            let challenged = load_identity(tx, &challenged_uid)?;
            let challenge = Challenge {
                id: ChallengeId::new(),
                challenger_uid: challenger.uid,
                challenged_uid: challenged.uid,
                challenger_display_name: challenger.display_name,
                challenged_display_name: challenged.display_name,
                mode,
                status: ChallengeStatus::Pending,
                created_at: now,
                updated_at: now,
                responded_at: None,
                expires_at,
                match_id: None,
            };

            tx.set(&paths::challenge(&challenge.id), &challenge)?;
            tx.set(
                &pair_path,
                &ChallengePair {
                    pending_challenge_id: Some(challenge.id),
                },
            )?;

            Ok(challenge)
        })?;

        info!(
            "{} challenged {} ({:?}), challenge {}",
            challenge.challenger_uid, challenge.challenged_uid, mode, challenge.id
        );

        Ok(challenge)
    }

    /// Opens the match the challenge asked for. Async matches get their questions up front.
    pub async fn accept_challenge(
        &self,
        id: &ChallengeId,
        caller: &Identity,
    ) -> Result<AcceptedChallenge, PvpError> {
        let challenge = self.respondable_challenge(id, &caller.uid)?;
        if challenge.mode == ChallengeMode::Sync || !challenge.is_live(self.now()) {
            return self.finish_accept(id, caller, None);
        }

        let guard = self.generation_guard(id.0);
        let _generating = guard.lock().await;
        self.respondable_challenge(id, &caller.uid)?;

        let questions = self
            .generator
            .generate_question_set(&self.settings.default_topics)
            .await?;

        self.finish_accept(id, caller, Some(&questions))
    }

    pub fn decline_challenge(&self, id: &ChallengeId, caller: &UserId) -> Result<Challenge, PvpError> {
        let now = self.now();

        let response = self.store.run_transaction(|tx| {
            let Some(mut challenge) = load_respondable(tx, id, caller, now)? else {
                return Ok(Response::Lapsed);
            };

            challenge.respond(ChallengeStatus::Declined, now);
            tx.set(&paths::challenge(id), &challenge)?;
            release_pair(tx, &challenge)?;

            Ok::<_, PvpError>(Response::Applied(challenge))
        })?;

        match response {
            Response::Applied(challenge) => {
                info!("{} declined challenge {}", caller, id);
                Ok(challenge)
            }
            Response::Lapsed => Err(PvpError::Conflict(ConflictKind::ChallengeNotPending)),
        }
    }

    /// Pending challenges involving the caller, newest first.
    pub fn challenge_inbox(&self, caller: &UserId) -> Result<ChallengeInbox, PvpError> {
        let now = self.now();
        let mut live: Vec<Challenge> = self
            .store
            .list::<Challenge>(paths::CHALLENGES)?
            .into_iter()
            .map(|(_, challenge)| challenge)
            .filter(|challenge| challenge.is_live(now))
            .collect();
        live.sort_by_key(|x| std::cmp::Reverse(x.created_at));

        let (incoming, outgoing): (Vec<Challenge>, Vec<Challenge>) = live
            .into_iter()
            .filter(|x| &x.challenged_uid == caller || &x.challenger_uid == caller)
            .partition(|x| &x.challenged_uid == caller);

        Ok(ChallengeInbox {
            incoming: incoming.into_iter().take(CHALLENGE_INBOX_LIMIT).collect(),
            outgoing: outgoing.into_iter().take(CHALLENGE_INBOX_LIMIT).collect(),
        })
    }

    /// Read-only pre-check so doomed accepts never reach the generator.
    fn respondable_challenge(&self, id: &ChallengeId, caller: &UserId) -> Result<Challenge, PvpError> {
        let challenge: Challenge = self
            .store
            .get(&paths::challenge(id))?
            .ok_or(PvpError::NotFound("Challenge"))?;
        if &challenge.challenged_uid != caller {
            return Err(PvpError::Forbidden);
        }
        if challenge.status != ChallengeStatus::Pending {
            return Err(PvpError::Conflict(ConflictKind::ChallengeNotPending));
        }

        Ok(challenge)
    }

    fn finish_accept(
        &self,
        id: &ChallengeId,
        caller: &Identity,
        questions: Option<&[Question]>,
    ) -> Result<AcceptedChallenge, PvpError> {
        let now = self.now();
        let match_expires_at = self.settings.async_match_deadline(now)?;

        let response = self
            .store
            .run_transaction(|tx| apply_accept(tx, id, caller, questions, now, match_expires_at))?;

        match response {
            Response::Applied(accepted) => {
                info!(
                    "{} accepted challenge {}, opened {:?} match {:?}",
                    caller.uid,
                    id,
                    accepted.challenge.mode,
                    accepted.challenge.match_id
                );
                Ok(accepted)
            }
            Response::Lapsed => Err(PvpError::Conflict(ConflictKind::ChallengeNotPending)),
        }
    }
}

/// `None` when the challenge turned out to be past its deadline; it is marked expired in `tx`.
fn load_respondable(
    tx: &mut Transaction<'_>,
    id: &ChallengeId,
    caller: &UserId,
    now: DateTime<Utc>,
) -> Result<Option<Challenge>, PvpError> {
    let mut challenge: Challenge = tx
        .get(&paths::challenge(id))?
        .ok_or(PvpError::NotFound("Challenge"))?;
    if &challenge.challenged_uid != caller {
        return Err(PvpError::Forbidden);
    }
    if challenge.status != ChallengeStatus::Pending {
        return Err(PvpError::Conflict(ConflictKind::ChallengeNotPending));
    }

    if !challenge.is_live(now) {
        challenge.respond(ChallengeStatus::Expired, now);
        tx.set(&paths::challenge(id), &challenge)?;
        release_pair(tx, &challenge)?;
        return Ok(None);
    }

    Ok(Some(challenge))
}

fn release_pair(tx: &mut Transaction<'_>, challenge: &Challenge) -> Result<(), PvpError> {
    let path = paths::challenge_pair(&challenge.challenger_uid, &challenge.challenged_uid);
    let pair: ChallengePair = tx.get(&path)?.unwrap_or_default();
    if pair.pending_challenge_id == Some(challenge.id) {
        tx.set(&path, &ChallengePair::default())?;
    }

    Ok(())
}

fn apply_accept(
    tx: &mut Transaction<'_>,
    id: &ChallengeId,
    caller: &Identity,
    questions: Option<&[Question]>,
    now: DateTime<Utc>,
    match_expires_at: DateTime<Utc>,
) -> Result<Response<AcceptedChallenge>, PvpError> {
    let Some(mut challenge) = load_respondable(tx, id, &caller.uid, now)? else {
        return Ok(Response::Lapsed);
    };

    let snapshot = Identity::new(
        challenge.challenger_uid.clone(),
        challenge.challenger_display_name.clone(),
        None,
    );
    let challenger = load_identity(tx, &challenge.challenger_uid)?.with_fallback(snapshot);
    let challenged = resolve_identity(tx, caller)?;

    let (session_id, match_id) = match challenge.mode {
        ChallengeMode::Sync => {
            let session = SyncMatch::from_challenge(&challenger, &challenged, now);
            tx.set(&paths::sync_match(&session.id), &session)?;
            set_active_match(tx, &challenger.uid, Some(session.id))?;
            set_active_match(tx, &challenged.uid, Some(session.id))?;

            (Some(session.id), None)
        }
        ChallengeMode::Async => {
            let questions = questions
                .filter(|x| !x.is_empty())
                .ok_or_else(|| PvpError::Upstream(String::from("no question set was generated")))?;
            let opened = AsyncMatch::from_challenge(
                challenge.id,
                &challenger,
                &challenged,
                questions.to_vec(),
                now,
                match_expires_at,
            );
            tx.set(&paths::async_match(&opened.id), &opened)?;

            (None, Some(opened.id))
        }
    };

    challenge.respond(ChallengeStatus::Accepted, now);
    challenge.match_id = session_id.or(match_id);
    tx.set(&paths::challenge(id), &challenge)?;
    release_pair(tx, &challenge)?;

    Ok(Response::Applied(AcceptedChallenge {
        challenger_uid: challenge.challenger_uid.clone(),
        challenge,
        session_id,
        match_id,
    }))
}
