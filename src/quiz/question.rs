use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub choices: Vec<String>,
    #[serde(alias = "correctChoiceIndex")]
    pub answer_index: u32,
    pub explanation: String,
}

/// A question as the generator hands it over, before it is trusted.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedQuestion {
    #[serde(default)]
    pub id: Option<String>,
    pub prompt: String,
    pub choices: Vec<String>,
    #[serde(alias = "correctChoiceIndex")]
    pub answer_index: i64,
    pub explanation: String,
}

#[derive(Clone, Copy, Debug)]
pub struct QuestionSetShape {
    pub question_count: usize,
    pub choices_per_question: usize,
}

impl Default for QuestionSetShape {
    fn default() -> Self {
        QuestionSetShape {
            question_count: 5,
            choices_per_question: 4,
        }
    }
}

/// Checks a generated set against the expected shape and normalises it.
///
/// Questions without an id get a fresh uuid; text is trimmed. Anything
/// malformed rejects the whole set, nothing is partially accepted.
pub fn validate_question_set(
    raw: Vec<GeneratedQuestion>,
    shape: QuestionSetShape,
) -> Result<Vec<Question>, String> {
    if raw.len() != shape.question_count {
        return Err(format!(
            "expected {} questions, generator returned {}",
            shape.question_count,
            raw.len()
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut questions = Vec::with_capacity(raw.len());

    for (position, question) in raw.into_iter().enumerate() {
        let prompt = question.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(format!("question {position} has an empty prompt"));
        }

        let choices: Vec<String> = question
            .choices
            .iter()
            .map(|choice| choice.trim().to_string())
            .collect();
        if choices.len() < 2 || choices.len() != shape.choices_per_question {
            return Err(format!(
                "question {position} has {} choices, expected {}",
                choices.len(),
                shape.choices_per_question
            ));
        }
        if choices.iter().any(String::is_empty) {
            return Err(format!("question {position} has an empty choice"));
        }

        if question.answer_index < 0 || question.answer_index as usize >= choices.len() {
            return Err(format!(
                "question {position} answer index {} is out of range",
                question.answer_index
            ));
        }

        let explanation = question.explanation.trim().to_string();
        if explanation.is_empty() {
            return Err(format!("question {position} has an empty explanation"));
        }

        let id = match question.id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        if !seen_ids.insert(id.clone()) {
            return Err(format!("question id {id} appears more than once"));
        }

        questions.push(Question {
            id,
            prompt,
            choices,
            answer_index: question.answer_index as u32,
            explanation,
        });
    }

    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_question(id: Option<&str>, answer_index: i64) -> GeneratedQuestion {
        GeneratedQuestion {
            id: id.map(String::from),
            prompt: "  Which queue guarantees ordering?  ".to_string(),
            choices: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            answer_index,
            explanation: "Because partitions are ordered.".to_string(),
        }
    }

    fn shape(count: usize) -> QuestionSetShape {
        QuestionSetShape {
            question_count: count,
            choices_per_question: 4,
        }
    }

    #[test]
    fn test_valid_set_is_normalised() {
        let raw = vec![raw_question(Some("q1"), 0), raw_question(None, 3)];

        let questions = validate_question_set(raw, shape(2)).unwrap();

        assert_eq!(questions[0].id, "q1");
        assert_eq!(questions[0].prompt, "Which queue guarantees ordering?");
        assert!(!questions[1].id.is_empty());
        assert_eq!(questions[1].answer_index, 3);
    }

    #[test]
    fn test_wrong_count_is_rejected() {
        let raw = vec![raw_question(None, 0)];

        assert!(validate_question_set(raw, shape(5)).is_err());
    }

    #[test]
    fn test_answer_out_of_range_is_rejected() {
        assert!(validate_question_set(vec![raw_question(None, 4)], shape(1)).is_err());
        assert!(validate_question_set(vec![raw_question(None, -1)], shape(1)).is_err());
    }

    #[test]
    fn test_too_few_choices_is_rejected() {
        let mut question = raw_question(None, 0);
        question.choices = vec!["only".into()];

        let result = validate_question_set(
            vec![question],
            QuestionSetShape {
                question_count: 1,
                choices_per_question: 1,
            },
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let raw = vec![raw_question(Some("q1"), 0), raw_question(Some("q1"), 1)];

        assert!(validate_question_set(raw, shape(2)).is_err());
    }

    #[test]
    fn test_blank_choice_is_rejected() {
        let mut question = raw_question(None, 0);
        question.choices[2] = "   ".into();

        assert!(validate_question_set(vec![question], shape(1)).is_err());
    }
}
