use crate::error::{ConflictKind, PvpError};
use crate::ids::{MatchId, UserId};
use crate::matches::history::{record_history, MatchType};
use crate::matches::match_types::{PlayerEntry, SessionStatus, Submission, SyncMatch};
use crate::matches::scoring::resolve_winner;
use crate::matches::service::PvpService;
use crate::quiz::Question;
use crate::store::directory::{clear_active_match, resolve_identity, set_active_match, Identity, UserProfile};
use crate::store::{paths, Transaction};
use chrono::{DateTime, Utc};
use log::{debug, info};

impl PvpService {
    /// Hands back the caller's unfinished session if there is one, otherwise opens a lobby.
    pub fn create_or_resume(&self, caller: &Identity) -> Result<SyncMatch, PvpError> {
        let uid = &caller.uid;
        let fallback = self.newest_unfinished_session(uid)?;
        let now = self.now();

        let (session, created) = self.store.run_transaction(|tx| -> Result<_, PvpError> {
            let profile: UserProfile = tx.get(&paths::user(uid))?.unwrap_or_default();

            for candidate in profile.active_pvp_session_id.into_iter().chain(fallback) {
                let Some(existing) = tx.get::<SyncMatch>(&paths::sync_match(&candidate))? else {
                    continue;
                };
                if existing.roster.contains(uid) && existing.status != SessionStatus::Completed {
                    set_active_match(tx, uid, Some(existing.id))?;
                    return Ok((existing, false));
                }
            }

            let identity = resolve_identity(tx, caller)?;
            let lobby = SyncMatch::open_lobby(&identity, now);
            tx.set(&paths::sync_match(&lobby.id), &lobby)?;
            set_active_match(tx, uid, Some(lobby.id))?;

            Ok((lobby, true))
        })?;

        if created {
            info!("Opened PvP session {} for {}", session.id, uid);
        } else {
            debug!("Resumed PvP session {} for {}", session.id, uid);
        }

        Ok(session)
    }

    pub fn get_sync(&self, id: &MatchId, caller: &UserId) -> Result<SyncMatch, PvpError> {
        let session: SyncMatch = self
            .store
            .get(&paths::sync_match(id))?
            .ok_or(PvpError::NotFound("Session"))?;
        session.roster.require_participant(caller)?;

        Ok(session)
    }

    pub fn join_sync(&self, id: &MatchId, caller: &Identity) -> Result<SyncMatch, PvpError> {
        let now = self.now();

        let (session, joined) = self
            .store
            .run_transaction(|tx| apply_sync_join(tx, id, caller, now))?;

        if joined {
            info!("{} joined PvP session {} ({:?})", caller.uid, id, session.status);
        }

        Ok(session)
    }

    /// Generates the question set and moves the session to `in_progress`.
    ///
    /// Racing starts are serialised per session; whoever gets the guard second
    /// re-reads the session and finds the set already persisted.
    pub async fn start_sync(&self, id: &MatchId, caller: &UserId) -> Result<SyncMatch, PvpError> {
        let session = self.get_sync(id, caller)?;
        if start_is_settled(&session)? {
            return Ok(session);
        }

        let guard = self.generation_guard(id.0);
        let _generating = guard.lock().await;

        let current = self.get_sync(id, caller)?;
        if start_is_settled(&current)? {
            return Ok(current);
        }

        let generated = if current.questions.is_empty() {
            Some(
                self.generator
                    .generate_question_set(&self.settings.default_topics)
                    .await?,
            )
        } else {
            None
        };
        let now = self.now();

        let (session, started) = self.store.run_transaction(|tx| {
            apply_sync_start(tx, id, caller, generated.as_deref(), now)
        })?;

        if started {
            info!(
                "PvP session {} started with {} questions",
                id,
                session.questions.len()
            );
        }

        Ok(session)
    }

    pub fn submit_sync(
        &self,
        id: &MatchId,
        caller: &UserId,
        submission: &Submission,
    ) -> Result<SyncMatch, PvpError> {
        submission.validate()?;
        let now = self.now();

        let (session, completed) = self
            .store
            .run_transaction(|tx| apply_sync_submission(tx, id, caller, submission, now))?;

        if completed {
            info!(
                "PvP session {} completed, winner {:?} by {:?}",
                id, session.winner_uid, session.winner_reason
            );
        }

        Ok(session)
    }

    /// Most recent non-completed session the user takes part in.
    fn newest_unfinished_session(&self, uid: &UserId) -> Result<Option<MatchId>, PvpError> {
        let sessions = self.store.list::<SyncMatch>(paths::SYNC_MATCHES)?;

        Ok(sessions
            .into_iter()
            .map(|(_, session)| session)
            .filter(|x| x.status != SessionStatus::Completed && x.roster.contains(uid))
            .max_by_key(|x| x.created_at)
            .map(|x| x.id))
    }
}

/// `Ok(true)` when a start call should hand back the session untouched.
fn start_is_settled(session: &SyncMatch) -> Result<bool, PvpError> {
    if !session.questions.is_empty() && session.status != SessionStatus::Ready {
        return Ok(true);
    }
    if !session.roster.is_full() {
        return Err(PvpError::Conflict(ConflictKind::NotEnoughPlayers));
    }

    Ok(false)
}

pub(crate) fn apply_sync_join(
    tx: &mut Transaction<'_>,
    id: &MatchId,
    caller: &Identity,
    now: DateTime<Utc>,
) -> Result<(SyncMatch, bool), PvpError> {
    let path = paths::sync_match(id);
    let mut session: SyncMatch = tx.get(&path)?.ok_or(PvpError::NotFound("Session"))?;
    if session.roster.contains(&caller.uid) {
        return Ok((session, false));
    }

    let identity = resolve_identity(tx, caller)?;
    session
        .roster
        .add(PlayerEntry::join(&identity, now))
        .map_err(PvpError::Conflict)?;
    if session.roster.is_full() {
        session.status = SessionStatus::Ready;
    }

    tx.set(&path, &session)?;
    set_active_match(tx, &caller.uid, Some(session.id))?;

    Ok((session, true))
}

pub(crate) fn apply_sync_start(
    tx: &mut Transaction<'_>,
    id: &MatchId,
    caller: &UserId,
    generated: Option<&[Question]>,
    now: DateTime<Utc>,
) -> Result<(SyncMatch, bool), PvpError> {
    let path = paths::sync_match(id);
    let mut session: SyncMatch = tx.get(&path)?.ok_or(PvpError::NotFound("Session"))?;
    session.roster.require_participant(caller)?;
    if start_is_settled(&session)? {
        return Ok((session, false));
    }

    if session.questions.is_empty() {
        let questions = generated
            .ok_or_else(|| PvpError::Upstream(String::from("no question set was generated")))?;
        session.questions = questions.to_vec();
    }
    session.status = SessionStatus::InProgress;
    session.started_at.get_or_insert(now);

    tx.set(&path, &session)?;

    Ok((session, true))
}

/// Records the caller's answers; the transaction that sees both submissions completes the session.
pub(crate) fn apply_sync_submission(
    tx: &mut Transaction<'_>,
    id: &MatchId,
    caller: &UserId,
    submission: &Submission,
    now: DateTime<Utc>,
) -> Result<(SyncMatch, bool), PvpError> {
    let path = paths::sync_match(id);
    let mut session: SyncMatch = tx.get(&path)?.ok_or(PvpError::NotFound("Session"))?;
    session.roster.require_participant(caller)?;
    if matches!(session.status, SessionStatus::Waiting | SessionStatus::Ready) {
        return Err(PvpError::Conflict(ConflictKind::NotStarted));
    }

    let recorded = session
        .roster
        .record_submission(caller, &session.questions, submission, now)?;
    if !recorded {
        return Ok((session, false));
    }

    let completes = session.status != SessionStatus::Completed && session.roster.both_submitted();
    if completes {
        if let Some((first, second)) = session.roster.pair_ids() {
            let outcome = resolve_winner(first, second, &session.roster.players);

            record_history(
                tx,
                session.id,
                MatchType::Sync,
                &session.roster,
                session.questions.len(),
                &outcome,
                now,
            )?;
            for uid in &session.roster.participant_ids {
                clear_active_match(tx, uid, &session.id)?;
            }

            session.winner_uid = outcome.winner_uid;
            session.winner_reason = Some(outcome.winner_reason);
            session.completed_at = Some(now);
            session.status = SessionStatus::Completed;
        }
    }

    tx.set(&path, &session)?;

    Ok((session, completes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::history::{list_history, MatchOutcome};
    use crate::matches::match_types::{SelectedAnswers, WinnerReason};
    use crate::matches::service::test_support::{harness, player, Harness};
    use crate::store::StoreError;
    use std::sync::{Arc, Barrier};

    fn answers(values: [u32; 5]) -> SelectedAnswers {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("q{}", i + 1), *v))
            .collect()
    }

    fn submission(values: [u32; 5], seconds: f64) -> Submission {
        Submission {
            selected_answers: answers(values),
            time_taken_seconds: seconds,
        }
    }

    async fn started_session(h: &Harness) -> SyncMatch {
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        h.service.join_sync(&lobby.id, &player("bob")).unwrap();

        h.service
            .start_sync(&lobby.id, &UserId::from("alice"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_decided_by_score() {
        let h = harness();
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        assert_eq!(lobby.status, SessionStatus::Waiting);
        assert!(lobby.questions.is_empty());

        let ready = h.service.join_sync(&lobby.id, &player("bob")).unwrap();
        assert_eq!(ready.status, SessionStatus::Ready);

        let started = h.service.start_sync(&lobby.id, &alice).await.unwrap();
        assert_eq!(started.status, SessionStatus::InProgress);
        assert_eq!(started.questions.len(), 5);

        let partial = h
            .service
            .submit_sync(&lobby.id, &alice, &submission([1, 0, 2, 1, 3], 30.0))
            .unwrap();
        assert_eq!(partial.status, SessionStatus::InProgress);
        assert_eq!(partial.roster.player(&alice).unwrap().score, Some(5));

        let done = h
            .service
            .submit_sync(&lobby.id, &bob, &submission([1, 1, 2, 1, 0], 45.0))
            .unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.roster.player(&bob).unwrap().score, Some(3));
        assert_eq!(done.winner_uid, Some(alice.clone()));
        assert_eq!(done.winner_reason, Some(WinnerReason::Score));

        let profile: UserProfile = h.service.store().get(&paths::user(&alice)).unwrap().unwrap();
        assert_eq!(profile.active_pvp_session_id, None);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_session_ready_for_retry() {
        let h = harness();
        let alice = UserId::from("alice");
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        h.service.join_sync(&lobby.id, &player("bob")).unwrap();
        h.provider.fail_next(1);

        let failed = h.service.start_sync(&lobby.id, &alice).await;
        assert!(matches!(failed, Err(PvpError::Upstream(_))));

        let untouched = h.service.get_sync(&lobby.id, &alice).unwrap();
        assert_eq!(untouched.status, SessionStatus::Ready);
        assert!(untouched.questions.is_empty());
        assert!(untouched.started_at.is_none());

        let started = h.service.start_sync(&lobby.id, &alice).await.unwrap();
        assert_eq!(started.status, SessionStatus::InProgress);
        assert_eq!(started.questions.len(), 5);
        assert_eq!(h.provider.calls(), 2);
        assert_eq!(h.service.pending_generation_guards(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_start_releases_its_guard() {
        let h = harness();
        let alice = UserId::from("alice");
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        h.service.join_sync(&lobby.id, &player("bob")).unwrap();

        let held = h.service.generation_guard(lobby.id.0);
        let generating = held.lock().await;
        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            h.service.start_sync(&lobby.id, &alice),
        )
        .await;

        assert!(cancelled.is_err());
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.service.pending_generation_guards(), 1);

        drop(generating);
        drop(held);
        assert_eq!(h.service.pending_generation_guards(), 0);

        let started = h.service.start_sync(&lobby.id, &alice).await.unwrap();
        assert_eq!(started.status, SessionStatus::InProgress);
        assert_eq!(h.service.pending_generation_guards(), 0);
    }

    #[tokio::test]
    async fn test_equal_scores_decided_by_time() {
        let h = harness();
        let session = started_session(&h).await;
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        h.service
            .submit_sync(&session.id, &bob, &submission([1, 0, 2, 1, 0], 35.0))
            .unwrap();
        let done = h
            .service
            .submit_sync(&session.id, &alice, &submission([1, 0, 2, 1, 0], 20.0))
            .unwrap();

        assert_eq!(done.winner_uid, Some(alice));
        assert_eq!(done.winner_reason, Some(WinnerReason::Time));
    }

    #[tokio::test]
    async fn test_identical_results_draw() {
        let h = harness();
        let session = started_session(&h).await;

        for uid in ["alice", "bob"] {
            h.service
                .submit_sync(&session.id, &UserId::from(uid), &submission([1, 0, 2, 1, 3], 25.0))
                .unwrap();
        }

        let done = h.service.get_sync(&session.id, &UserId::from("bob")).unwrap();
        assert_eq!(done.winner_uid, None);
        assert_eq!(done.winner_reason, Some(WinnerReason::Tie));

        let page = list_history(h.service.store(), &UserId::from("alice"), 20, None).unwrap();
        assert_eq!(page.history[0].outcome, MatchOutcome::Draw);
    }

    #[tokio::test]
    async fn test_outsider_is_forbidden_and_changes_nothing() {
        let h = harness();
        let session = started_session(&h).await;
        let mallory = UserId::from("mallory");

        let fetched = h.service.get_sync(&session.id, &mallory);
        let submitted = h
            .service
            .submit_sync(&session.id, &mallory, &submission([1, 0, 2, 1, 3], 1.0));

        assert!(matches!(fetched, Err(PvpError::Forbidden)));
        assert!(matches!(submitted, Err(PvpError::Forbidden)));
        assert_eq!(
            h.service.get_sync(&session.id, &UserId::from("alice")).unwrap(),
            session
        );
        assert!(matches!(
            h.service.get_sync(&MatchId::new(), &mallory),
            Err(PvpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_third_player_cannot_join() {
        let h = harness();
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        h.service.join_sync(&lobby.id, &player("bob")).unwrap();

        let again = h.service.join_sync(&lobby.id, &player("bob")).unwrap();
        let third = h.service.join_sync(&lobby.id, &player("carol"));

        assert_eq!(again.roster.participant_ids.len(), 2);
        assert!(matches!(
            third,
            Err(PvpError::Conflict(ConflictKind::MatchFull))
        ));
    }

    #[tokio::test]
    async fn test_start_needs_two_players_and_submit_needs_start() {
        let h = harness();
        let alice = UserId::from("alice");
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();

        let early_start = h.service.start_sync(&lobby.id, &alice).await;
        let early_submit = h
            .service
            .submit_sync(&lobby.id, &alice, &submission([0; 5], 1.0));

        assert!(matches!(
            early_start,
            Err(PvpError::Conflict(ConflictKind::NotEnoughPlayers))
        ));
        assert!(matches!(
            early_submit,
            Err(PvpError::Conflict(ConflictKind::NotStarted))
        ));
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_start_generates_once() {
        let h = harness();
        let session = started_session(&h).await;

        let again = h
            .service
            .start_sync(&session.id, &UserId::from("bob"))
            .await
            .unwrap();

        assert_eq!(again.questions, session.questions);
        assert_eq!(again.started_at, session.started_at);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_starts_generate_once() {
        let h = harness();
        let lobby = h.service.create_or_resume(&player("alice")).unwrap();
        h.service.join_sync(&lobby.id, &player("bob")).unwrap();

        let tasks: Vec<_> = ["alice", "bob", "alice", "bob"]
            .into_iter()
            .map(|uid| {
                let service = h.service.clone();
                let id = lobby.id;
                tokio::spawn(async move { service.start_sync(&id, &UserId::from(uid)).await })
            })
            .collect();

        let mut question_sets = Vec::new();
        for task in tasks {
            question_sets.push(task.await.unwrap().unwrap().questions);
        }

        assert_eq!(h.provider.calls(), 1);
        assert!(question_sets.windows(2).all(|x| x[0] == x[1]));
        assert_eq!(h.service.pending_generation_guards(), 0);
    }

    #[tokio::test]
    async fn test_interleaved_final_submissions_complete_once() {
        let h = harness();
        let session = started_session(&h).await;
        let store = h.service.store();
        let now = Utc::now();
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));
        let alice_answers = submission([1, 0, 2, 1, 3], 30.0);
        let bob_answers = submission([1, 1, 2, 1, 0], 45.0);

        let mut first = store.begin();
        let mut second = store.begin();
        let (_, first_completed) =
            apply_sync_submission(&mut first, &session.id, &alice, &alice_answers, now).unwrap();
        let (_, second_completed) =
            apply_sync_submission(&mut second, &session.id, &bob, &bob_answers, now).unwrap();

        // Neither saw the other's write, so neither completes.
        assert!(!first_completed && !second_completed);
        assert!(first.commit().is_ok());
        assert!(matches!(second.commit(), Err(StoreError::Conflict(_))));

        let retried = h.service.submit_sync(&session.id, &bob, &bob_answers).unwrap();

        assert_eq!(retried.status, SessionStatus::Completed);
        assert_eq!(retried.winner_uid, Some(alice.clone()));
        assert_eq!(
            list_history(store, &alice, 20, None).unwrap().history.len(),
            1
        );
        assert_eq!(
            list_history(store, &bob, 20, None).unwrap().history[0].outcome,
            MatchOutcome::Loss
        );
    }

    #[tokio::test]
    async fn test_concurrent_submissions_on_threads() {
        let h = harness();
        let session = started_session(&h).await;
        let barrier = Arc::new(Barrier::new(2));

        let results: Vec<SyncMatch> = std::thread::scope(|scope| {
            let handles: Vec<_> = [("alice", 30.0), ("bob", 45.0)]
                .into_iter()
                .map(|(uid, seconds)| {
                    let service = h.service.clone();
                    let barrier = barrier.clone();
                    let id = session.id;
                    scope.spawn(move || {
                        barrier.wait();
                        service
                            .submit_sync(&id, &UserId::from(uid), &submission([1, 0, 2, 1, 3], seconds))
                            .unwrap()
                    })
                })
                .collect();

            handles.into_iter().map(|x| x.join().unwrap()).collect()
        });

        // The later commit must have read the earlier one, so exactly one call completes.
        let completed: Vec<&SyncMatch> = results
            .iter()
            .filter(|x| x.status == SessionStatus::Completed)
            .collect();
        assert_eq!(completed.len(), 1);

        let stored = h.service.get_sync(&session.id, &UserId::from("alice")).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.winner_uid, Some(UserId::from("alice")));
        assert_eq!(stored.winner_reason, Some(WinnerReason::Time));
        assert_eq!(completed[0].completed_at, stored.completed_at);
        assert_eq!(
            list_history(h.service.store(), &UserId::from("bob"), 20, None)
                .unwrap()
                .history
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_winner_fields_never_change_after_completion() {
        let h = harness();
        let session = started_session(&h).await;
        let (alice, bob) = (UserId::from("alice"), UserId::from("bob"));

        h.service
            .submit_sync(&session.id, &alice, &submission([1, 0, 2, 1, 3], 30.0))
            .unwrap();
        let done = h
            .service
            .submit_sync(&session.id, &bob, &submission([0; 5], 45.0))
            .unwrap();

        h.clock.advance(chrono::Duration::minutes(5));
        let resubmitted = h
            .service
            .submit_sync(&session.id, &bob, &submission([1, 0, 2, 1, 3], 1.0))
            .unwrap();
        let restarted = h.service.start_sync(&session.id, &bob).await.unwrap();

        for snapshot in [resubmitted, restarted] {
            assert_eq!(snapshot.status, SessionStatus::Completed);
            assert_eq!(snapshot.winner_uid, done.winner_uid);
            assert_eq!(snapshot.winner_reason, done.winner_reason);
            assert_eq!(snapshot.completed_at, done.completed_at);
        }
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_create_resumes_unfinished_session() {
        let h = harness();
        let first = h.service.create_or_resume(&player("alice")).unwrap();
        let second = h.service.create_or_resume(&player("alice")).unwrap();

        assert_eq!(first.id, second.id);

        // With Bob's pointer wiped, the session is still found by scanning.
        h.service.join_sync(&first.id, &player("bob")).unwrap();
        h.service
            .store()
            .set(&paths::user(&UserId::from("bob")), &UserProfile::default())
            .unwrap();
        let bobs = h.service.create_or_resume(&player("bob")).unwrap();
        assert_eq!(bobs.id, first.id);
    }

    #[tokio::test]
    async fn test_negative_time_is_rejected_before_the_store() {
        let h = harness();
        let session = started_session(&h).await;

        let result = h
            .service
            .submit_sync(&session.id, &UserId::from("alice"), &submission([0; 5], -3.0));

        assert!(matches!(result, Err(PvpError::Validation(_))));
        assert_eq!(
            h.service.get_sync(&session.id, &UserId::from("alice")).unwrap(),
            session
        );
    }
}
