use crate::ids::UserId;
use crate::matches::match_types::SelectedAnswers;
use crate::matches::{ChallengeMode, Submission};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub selected_answers: SelectedAnswers,
    pub time_taken_seconds: f64,
}

impl From<SubmitRequest> for Submission {
    fn from(request: SubmitRequest) -> Self {
        Submission {
            selected_answers: request.selected_answers,
            time_taken_seconds: request.time_taken_seconds,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeRequest {
    pub challenged_uid: UserId,
    #[serde(default)]
    pub mode: ChallengeMode,
}

#[derive(Deserialize, Debug, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_answer_index_does_not_parse() {
        let body = r#"{"selectedAnswers": {"q1": -1}, "timeTakenSeconds": 3}"#;

        assert!(serde_json::from_str::<SubmitRequest>(body).is_err());
    }

    #[test]
    fn test_challenge_mode_defaults_to_sync() {
        let request: CreateChallengeRequest =
            serde_json::from_str(r#"{"challengedUid": "bob"}"#).unwrap();

        assert_eq!(request.mode, ChallengeMode::Sync);
        assert_eq!(request.challenged_uid, UserId::from("bob"));
    }
}
