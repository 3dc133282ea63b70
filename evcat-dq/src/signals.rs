//! Show signal normalization
//!
//! Derives structured display attributes (doors time, age policy, ticket
//! status, re-entry policy, set-times flag) from an event's free text and tags.
//!
//! Resolution per field:
//! 1. a preserved existing value, when `preserve_existing` and it canonicalizes
//! 2. a value from tags
//! 3. a value from free-text patterns
//! 4. null
//!
//! Every raw spelling goes through [`canonicalize`]. Values missing from the
//! canonicalization table are dropped to null, never passed through.

use chrono::NaiveTime;
use evcat_common::db::StoredSignals;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgePolicy {
    #[serde(rename = "21+")]
    TwentyOnePlus,
    #[serde(rename = "18+")]
    EighteenPlus,
    #[serde(rename = "all-ages")]
    AllAges,
    #[serde(rename = "adults-only")]
    AdultsOnly,
}

impl AgePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgePolicy::TwentyOnePlus => "21+",
            AgePolicy::EighteenPlus => "18+",
            AgePolicy::AllAges => "all-ages",
            AgePolicy::AdultsOnly => "adults-only",
        }
    }
}

/// Ticket availability, declared in priority order (first wins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    SoldOut,
    LowTickets,
    Free,
    TicketsAvailable,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::SoldOut => "sold-out",
            TicketStatus::LowTickets => "low-tickets",
            TicketStatus::Free => "free",
            TicketStatus::TicketsAvailable => "tickets-available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReentryPolicy {
    NoReentry,
    ReentryAllowed,
}

impl ReentryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReentryPolicy::NoReentry => "no-reentry",
            ReentryPolicy::ReentryAllowed => "reentry-allowed",
        }
    }
}

/// Canonical token a raw spelling maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalToken {
    Age(AgePolicy),
    Ticket(TicketStatus),
    Reentry(ReentryPolicy),
}

/// Raw spelling (after key normalization) to canonical token
const CANONICAL_TOKENS: &[(&str, SignalToken)] = &[
    ("21+", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("21-plus", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("21plus", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("21-and-over", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("21-and-up", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("over-21", SignalToken::Age(AgePolicy::TwentyOnePlus)),
    ("18+", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("18-plus", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("18plus", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("18-and-over", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("18-and-up", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("over-18", SignalToken::Age(AgePolicy::EighteenPlus)),
    ("all-ages", SignalToken::Age(AgePolicy::AllAges)),
    ("allages", SignalToken::Age(AgePolicy::AllAges)),
    ("all-age", SignalToken::Age(AgePolicy::AllAges)),
    ("adults-only", SignalToken::Age(AgePolicy::AdultsOnly)),
    ("adult-only", SignalToken::Age(AgePolicy::AdultsOnly)),
    ("sold-out", SignalToken::Ticket(TicketStatus::SoldOut)),
    ("soldout", SignalToken::Ticket(TicketStatus::SoldOut)),
    ("low-tickets", SignalToken::Ticket(TicketStatus::LowTickets)),
    ("few-tickets-left", SignalToken::Ticket(TicketStatus::LowTickets)),
    ("limited-tickets", SignalToken::Ticket(TicketStatus::LowTickets)),
    ("almost-sold-out", SignalToken::Ticket(TicketStatus::LowTickets)),
    ("selling-fast", SignalToken::Ticket(TicketStatus::LowTickets)),
    ("free", SignalToken::Ticket(TicketStatus::Free)),
    ("free-admission", SignalToken::Ticket(TicketStatus::Free)),
    ("free-entry", SignalToken::Ticket(TicketStatus::Free)),
    ("no-cover", SignalToken::Ticket(TicketStatus::Free)),
    ("tickets-available", SignalToken::Ticket(TicketStatus::TicketsAvailable)),
    ("on-sale", SignalToken::Ticket(TicketStatus::TicketsAvailable)),
    ("no-reentry", SignalToken::Reentry(ReentryPolicy::NoReentry)),
    ("no-re-entry", SignalToken::Reentry(ReentryPolicy::NoReentry)),
    ("no-readmission", SignalToken::Reentry(ReentryPolicy::NoReentry)),
    ("reentry-allowed", SignalToken::Reentry(ReentryPolicy::ReentryAllowed)),
    ("re-entry-allowed", SignalToken::Reentry(ReentryPolicy::ReentryAllowed)),
    ("reentry-permitted", SignalToken::Reentry(ReentryPolicy::ReentryAllowed)),
    ("in-and-out", SignalToken::Reentry(ReentryPolicy::ReentryAllowed)),
];

static KEY_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s_\-]+").expect("static regex"));

static DOORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdoors?\s*(?:open\s*)?(?:at\s*|@\s*|:\s*)?(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s*m\b")
        .expect("static regex")
});

static AGE_21: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b21\s*(?:\+|plus\b|(?:and|&)\s*(?:over|up)\b|or\s+older\b)|\bover\s+21\b")
        .expect("static regex")
});

static AGE_18: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b18\s*(?:\+|plus\b|(?:and|&)\s*(?:over|up)\b|or\s+older\b)|\bover\s+18\b")
        .expect("static regex")
});

static ADULTS_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\badults?[\s-]+only\b").expect("static regex"));

static ALL_AGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\ball[\s_-]*ages\b").expect("static regex"));

static LOW_TICKETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:almost|nearly)\s+sold[\s-]*out\b|\b(?:few|limited|last)\s+(?:tickets|seats)\b|\blow\s+tickets\b|\bselling\s+fast\b|\btickets\s+(?:are\s+)?(?:limited|going\s+fast)\b",
    )
    .expect("static regex")
});

static NEAR_SOLD_OUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:almost|nearly)\s+sold[\s-]*out\b").expect("static regex"));

static SOLD_OUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsold[\s-]*out\b").expect("static regex"));

static FREE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\bfree\s+(?:admission|entry|entrance|event|show|concert|to\s+attend)\b|\badmission\s+(?:is\s+)?free\b|\bno\s+cover\b|\bfree\s+(?:and\s+)?open\s+to\s+the\s+public\b|^\s*free[.!]?\s*$|\b(?:is|are)\s+free(?:\s+(?:of\s+charge|for\s+(?:all|everyone)|to\s+attend))?\s*(?:[.!,;)]|$|\s+(?:and|but)\b)",
    )
    .expect("static regex")
});

static TICKETS_AVAILABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btickets?\s+(?:are\s+)?(?:available|on\s+sale)\b|\bon\s+sale\s+now\b|\b(?:buy|get)\s+tickets\b")
        .expect("static regex")
});

static NO_REENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bno\s+re[\s-]?(?:entry|admission)\b|\bno\s+in\s*(?:-|and|&)\s*outs?\b")
        .expect("static regex")
});

static REENTRY_ALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bre[\s-]?entry\s+(?:is\s+)?(?:allowed|permitted)\b|\bin\s*(?:-|and|&)\s*out\s+privileges\b")
        .expect("static regex")
});

static SET_TIMES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bset[\s-]*times?\b").expect("static regex"));

/// Normalized signals for one event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSet {
    /// 24-hour "HH:MM"
    pub doors_time: Option<String>,
    pub age_policy: Option<AgePolicy>,
    pub ticket_status: Option<TicketStatus>,
    pub reentry_policy: Option<ReentryPolicy>,
    pub set_times_mentioned: bool,
}

impl SignalSet {
    /// Column representation
    pub fn to_stored(&self) -> StoredSignals {
        StoredSignals {
            doors_time: self.doors_time.clone(),
            age_policy: self.age_policy.map(|v| v.as_str().to_string()),
            ticket_status: self.ticket_status.map(|v| v.as_str().to_string()),
            reentry_policy: self.reentry_policy.map(|v| v.as_str().to_string()),
            set_times_mentioned: self.set_times_mentioned,
        }
    }
}

/// Map a raw spelling ("Sold Out", "all_ages", "21-and-over") to its token
pub fn canonicalize(raw: &str) -> Option<SignalToken> {
    let key = KEY_SEPARATORS
        .replace_all(raw.trim().to_lowercase().as_str(), "-")
        .trim_matches('-')
        .to_string();
    CANONICAL_TOKENS
        .iter()
        .find(|(spelling, _)| *spelling == key)
        .map(|(_, token)| *token)
}

fn canonical_age(raw: &str) -> Option<AgePolicy> {
    match canonicalize(raw)? {
        SignalToken::Age(v) => Some(v),
        _ => None,
    }
}

fn canonical_ticket(raw: &str) -> Option<TicketStatus> {
    match canonicalize(raw)? {
        SignalToken::Ticket(v) => Some(v),
        _ => None,
    }
}

fn canonical_reentry(raw: &str) -> Option<ReentryPolicy> {
    match canonicalize(raw)? {
        SignalToken::Reentry(v) => Some(v),
        _ => None,
    }
}

/// Validate a stored doors time ("H:MM" or "HH:MM", 24-hour)
fn canonical_doors_time(raw: &str) -> Option<String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .ok()
        .map(|t| t.format("%H:%M").to_string())
}

/// Derive the full signal set for one event
pub fn derive_signals(
    event_text: &str,
    tags: &[String],
    existing: &StoredSignals,
    preserve_existing: bool,
) -> SignalSet {
    let doors_time = preserved(&existing.doors_time, preserve_existing)
        .and_then(canonical_doors_time)
        .or_else(|| detect_doors_time(event_text));

    let age_policy = preserved(&existing.age_policy, preserve_existing)
        .and_then(canonical_age)
        .or_else(|| age_from_tags(tags))
        .or_else(|| age_from_text(event_text));

    let ticket_status = preserved(&existing.ticket_status, preserve_existing)
        .and_then(canonical_ticket)
        .or_else(|| ticket_from_tags(tags))
        .or_else(|| ticket_from_text(event_text));

    let reentry_policy = preserved(&existing.reentry_policy, preserve_existing)
        .and_then(canonical_reentry)
        .or_else(|| reentry_from_tags(tags))
        .or_else(|| reentry_from_text(event_text));

    let set_times_mentioned = (preserve_existing && existing.set_times_mentioned)
        || SET_TIMES.is_match(event_text)
        || tags.iter().any(|t| SET_TIMES.is_match(t));

    SignalSet {
        doors_time,
        age_policy,
        ticket_status,
        reentry_policy,
        set_times_mentioned,
    }
}

fn preserved(value: &Option<String>, preserve_existing: bool) -> Option<&str> {
    if preserve_existing {
        value.as_deref()
    } else {
        None
    }
}

/// Parse "doors 7pm", "Doors open at 6:30 p.m.", "doors @ 8:15PM" into "HH:MM"
pub fn detect_doors_time(text: &str) -> Option<String> {
    for caps in DOORS.captures_iter(text) {
        let hour: u32 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            Some(h) => h,
            None => continue,
        };
        let minute: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        if !(1..=12).contains(&hour) || minute > 59 {
            continue;
        }
        let pm = caps
            .get(3)
            .is_some_and(|m| m.as_str().eq_ignore_ascii_case("p"));
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return Some(format!("{:02}:{:02}", hour24, minute));
    }
    None
}

fn age_from_tags(tags: &[String]) -> Option<AgePolicy> {
    let found: Vec<AgePolicy> = tags.iter().filter_map(|t| canonical_age(t)).collect();
    [
        AgePolicy::TwentyOnePlus,
        AgePolicy::EighteenPlus,
        AgePolicy::AdultsOnly,
        AgePolicy::AllAges,
    ]
    .into_iter()
    .find(|candidate| found.contains(candidate))
}

fn age_from_text(text: &str) -> Option<AgePolicy> {
    if AGE_21.is_match(text) {
        Some(AgePolicy::TwentyOnePlus)
    } else if AGE_18.is_match(text) {
        Some(AgePolicy::EighteenPlus)
    } else if ADULTS_ONLY.is_match(text) {
        Some(AgePolicy::AdultsOnly)
    } else if ALL_AGES.is_match(text) {
        Some(AgePolicy::AllAges)
    } else {
        None
    }
}

fn ticket_from_tags(tags: &[String]) -> Option<TicketStatus> {
    tags.iter().filter_map(|t| canonical_ticket(t)).min()
}

/// First matching status in priority order sold-out > low-tickets > free > available
fn ticket_from_text(text: &str) -> Option<TicketStatus> {
    let without_near_misses = NEAR_SOLD_OUT.replace_all(text, " ");
    if SOLD_OUT.is_match(&without_near_misses) {
        Some(TicketStatus::SoldOut)
    } else if LOW_TICKETS.is_match(text) {
        Some(TicketStatus::LowTickets)
    } else if FREE.is_match(text) {
        Some(TicketStatus::Free)
    } else if TICKETS_AVAILABLE.is_match(text) {
        Some(TicketStatus::TicketsAvailable)
    } else {
        None
    }
}

fn reentry_from_tags(tags: &[String]) -> Option<ReentryPolicy> {
    tags.iter().filter_map(|t| canonical_reentry(t)).min()
}

fn reentry_from_text(text: &str) -> Option<ReentryPolicy> {
    if NO_REENTRY.is_match(text) {
        Some(ReentryPolicy::NoReentry)
    } else if REENTRY_ALLOWED.is_match(text) {
        Some(ReentryPolicy::ReentryAllowed)
    } else {
        None
    }
}
