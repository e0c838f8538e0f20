//! Document layout. One record per match, one per (user, match) history entry.

use crate::ids::{ChallengeId, MatchId, UserId};

pub const SYNC_MATCHES: &str = "pvpSessions";
pub const ASYNC_MATCHES: &str = "asyncPvpMatches";
pub const CHALLENGES: &str = "pvpChallenges";
pub const CHALLENGE_PAIRS: &str = "pvpChallengePairs";
pub const USERS: &str = "users";
pub const HISTORY: &str = "pvpSessionHistory";
pub const FRIENDSHIPS: &str = "friendships";
pub const BLOCKS: &str = "blocks";

pub fn sync_match(id: &MatchId) -> String {
    format!("{SYNC_MATCHES}/{id}")
}

pub fn async_match(id: &MatchId) -> String {
    format!("{ASYNC_MATCHES}/{id}")
}

pub fn challenge(id: &ChallengeId) -> String {
    format!("{CHALLENGES}/{id}")
}

/// Both orderings of a pair map to the same document.
pub fn challenge_pair(first: &UserId, second: &UserId) -> String {
    let (a, b) = sorted_pair(first, second);
    format!("{CHALLENGE_PAIRS}/{a}_{b}")
}

pub fn user(uid: &UserId) -> String {
    format!("{USERS}/{uid}")
}

pub fn history_collection(uid: &UserId) -> String {
    format!("{USERS}/{uid}/{HISTORY}")
}

pub fn history_entry(uid: &UserId, match_id: &MatchId) -> String {
    format!("{}/{match_id}", history_collection(uid))
}

pub fn friendship(first: &UserId, second: &UserId) -> String {
    let (a, b) = sorted_pair(first, second);
    format!("{FRIENDSHIPS}/{a}_{b}")
}

pub fn block(blocker: &UserId, blocked: &UserId) -> String {
    format!("{BLOCKS}/{blocker}_{blocked}")
}

fn sorted_pair<'a>(first: &'a UserId, second: &'a UserId) -> (&'a UserId, &'a UserId) {
    if first <= second {
        (first, second)
    } else {
        (second, first)
    }
}
