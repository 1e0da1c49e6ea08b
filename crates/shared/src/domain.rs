use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(PrivateRoomId);
id_newtype!(ChatRequestId);
id_newtype!(HeartId);

pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_DISPLAY_NAME_CHARS: usize = 30;
pub const SYSTEM_AUTHOR: &str = "System";
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";
pub const PRIVATE_ROOM_PREFIX: &str = "private_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Chill,
    Energetic,
    Sad,
    Romantic,
}

impl Mood {
    pub const ALL: [Mood; 5] = [
        Mood::Happy,
        Mood::Chill,
        Mood::Energetic,
        Mood::Sad,
        Mood::Romantic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Chill => "chill",
            Mood::Energetic => "energetic",
            Mood::Sad => "sad",
            Mood::Romantic => "romantic",
        }
    }
}

impl FromStr for Mood {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Mood::ALL
            .into_iter()
            .find(|mood| mood.as_str().eq_ignore_ascii_case(raw))
            .ok_or(())
    }
}

/// A broadcast scope: a shared mood room or a two-party private room.
///
/// On the wire a room is its canonical string, `happy` or `private_42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomId {
    Mood(Mood),
    Private(PrivateRoomId),
}

impl RoomId {
    /// Parses a room id, normalizing mood names to lowercase.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Ok(mood) = raw.parse::<Mood>() {
            return Some(RoomId::Mood(mood));
        }
        let digits = raw.strip_prefix(PRIVATE_ROOM_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits
            .parse::<i64>()
            .ok()
            .map(|id| RoomId::Private(PrivateRoomId(id)))
    }

    pub fn private_room(self) -> Option<PrivateRoomId> {
        match self {
            RoomId::Private(id) => Some(id),
            RoomId::Mood(_) => None,
        }
    }

    pub fn is_private(self) -> bool {
        matches!(self, RoomId::Private(_))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Mood(mood) => f.write_str(mood.as_str()),
            RoomId::Private(id) => write!(f, "{PRIVATE_ROOM_PREFIX}{}", id.0),
        }
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for RoomId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value).ok_or_else(|| format!("invalid room id: {value}"))
    }
}

impl From<PrivateRoomId> for RoomId {
    fn from(value: PrivateRoomId) -> Self {
        RoomId::Private(value)
    }
}

/// Sender-generated idempotency key for a logical send, unique per room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(pub String);

impl ClientToken {
    pub fn generate(user_id: UserId) -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{millis}-{}", user_id.0, &nonce[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ChatRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRequestStatus::Pending => "pending",
            ChatRequestStatus::Accepted => "accepted",
            ChatRequestStatus::Rejected => "rejected",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "accepted" => ChatRequestStatus::Accepted,
            "rejected" => ChatRequestStatus::Rejected,
            _ => ChatRequestStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_moods_case_insensitively() {
        assert_eq!(RoomId::parse("Happy"), Some(RoomId::Mood(Mood::Happy)));
        assert_eq!(RoomId::parse("romantic").map(|r| r.to_string()), Some("romantic".into()));
        assert_eq!(RoomId::parse("grumpy"), None);
    }

    #[test]
    fn parses_private_rooms_strictly() {
        assert_eq!(
            RoomId::parse("private_42"),
            Some(RoomId::Private(PrivateRoomId(42)))
        );
        assert_eq!(RoomId::parse("private_"), None);
        assert_eq!(RoomId::parse("private_4a"), None);
        assert_eq!(RoomId::parse("private_-1"), None);
        assert_eq!(RoomId::Private(PrivateRoomId(7)).to_string(), "private_7");
    }

    #[test]
    fn room_id_round_trips_as_plain_string() {
        let json = serde_json::to_string(&RoomId::Private(PrivateRoomId(3))).expect("json");
        assert_eq!(json, "\"private_3\"");
        let parsed: RoomId = serde_json::from_str("\"CHILL\"").expect("parse");
        assert_eq!(parsed, RoomId::Mood(Mood::Chill));
        assert!(serde_json::from_str::<RoomId>("\"lobby\"").is_err());
    }

    #[test]
    fn generated_tokens_carry_user_prefix_and_differ() {
        let a = ClientToken::generate(UserId(9));
        let b = ClientToken::generate(UserId(9));
        assert!(a.as_str().starts_with("9-"));
        assert_ne!(a, b);
    }
}
