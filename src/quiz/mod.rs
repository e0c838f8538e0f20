pub mod question;
pub mod question_provider;

pub use question::{GeneratedQuestion, Question, QuestionSetShape};
pub use question_provider::{HttpQuestionProvider, QuestionProvider, QuestionSetGenerator, StaticQuestionProvider};
