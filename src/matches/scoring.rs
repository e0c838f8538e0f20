use crate::ids::UserId;
use crate::matches::match_types::{Outcome, PlayerEntry, SelectedAnswers, WinnerReason};
use crate::quiz::Question;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Number of questions whose selected choice equals the correct one. Unanswered counts as wrong.
pub fn compute_score(questions: &[Question], selected_answers: &SelectedAnswers) -> u32 {
    questions
        .iter()
        .filter(|question| selected_answers.get(&question.id) == Some(&question.answer_index))
        .count() as u32
}

/// Score first, then time taken, then a draw. Independent of submission order.
pub fn resolve_winner(
    first: &UserId,
    second: &UserId,
    players: &BTreeMap<UserId, PlayerEntry>,
) -> Outcome {
    let score = |uid: &UserId| players.get(uid).and_then(|x| x.score).unwrap_or(0);
    let time = |uid: &UserId| {
        players
            .get(uid)
            .and_then(|x| x.time_taken_seconds)
            .unwrap_or(f64::INFINITY)
    };

    match score(first).cmp(&score(second)) {
        Ordering::Greater => return decided(first, WinnerReason::Score),
        Ordering::Less => return decided(second, WinnerReason::Score),
        Ordering::Equal => {}
    }

    let (first_time, second_time) = (time(first), time(second));
    if first_time < second_time {
        decided(first, WinnerReason::Time)
    } else if second_time < first_time {
        decided(second, WinnerReason::Time)
    } else {
        Outcome {
            winner_uid: None,
            winner_reason: WinnerReason::Tie,
        }
    }
}

fn decided(uid: &UserId, winner_reason: WinnerReason) -> Outcome {
    Outcome {
        winner_uid: Some(uid.clone()),
        winner_reason,
    }
}
