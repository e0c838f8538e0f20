pub mod async_match;
pub mod challenge;
pub mod expiry_ticker;
pub mod history;
pub mod match_types;
pub mod scoring;
pub mod service;
pub mod sync_match;

pub use challenge::{AcceptedChallenge, Challenge, ChallengeInbox, ChallengeMode, ChallengeStatus};
pub use history::{HistoryEntry, HistoryPage, MatchOutcome, MatchType};
pub use match_types::{
    AsyncInboxEntry, AsyncMatch, AsyncMatchStatus, SessionStatus, Submission, SyncMatch, WinnerReason,
};
pub use service::{MatchSettings, PvpService};
