// rt-chat-protocol: wire types shared by the chat server and its clients.
//
// Every frame on every channel (MSG, CMD, DATA) is a single `Envelope`
// carrying one typed `Payload` variant.  Discrimination is a top-level
// `type` field, the same self-describing-JSON discipline the rest of this
// workspace uses for its own wire messages.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope / payload
// ---------------------------------------------------------------------------

/// The outermost framed record on the wire.
///
/// `user_id` is informational only -- the connection's bound identity
/// (established by `REMEMBER_CONNECTION`) is the actual authority for who
/// sent a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    ChatMessage(ChatMessage),
    CommandRequest(CommandRequest),
    FileChunk(FileChunk),
    SyncItem(SyncItem),
    OfflineMessages(OfflineMessages),
}

impl Envelope {
    pub fn command(action: CommandAction) -> Self {
        Envelope {
            user_id: None,
            payload: Payload::CommandRequest(CommandRequest {
                action,
                sender: String::new(),
                args: Vec::new(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// A single chat message, private or group-addressed.
///
/// Immutable once persisted. `pin` mirrors the original client's "pinned in
/// conversation" flag; it carries no server-side routing meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub receiver: String,
    pub is_group: bool,
    pub timestamp: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub pin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<FilePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub file_id: String,
}

/// Wrapper for the batch of messages replayed to a client during
/// `ONLINE_INIT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineMessages {
    pub messages: Vec<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Command requests (CMD channel)
// ---------------------------------------------------------------------------

/// A single control command. `sender` is filled in server-side from the
/// connection's bound identity before a request reaches a handler; clients
/// may leave it blank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub action: CommandAction,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The closed sum of every control action the Command Handler recognizes.
///
/// The wire form keeps a string discriminator (`action`) rather than the
/// original's raw integer enum -- self-describing and equally stable across
/// versions, and consistent with how every other tagged union in this
/// protocol is represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandAction {
    // --- auth ---
    SignIn { principal: String, pw_hash: String },
    SignOut,
    GetVeriCode { email: String },
    Authentication { email: String, code: String },
    Register { email: String, user_id: String, pw_hash: String },
    ChangePassword { old_pw_hash: String, new_pw_hash: String },
    ChangeUsername { new_user_id: String },
    FindPassword { email: String, code: String, new_pw_hash: String },

    // --- connection binding ---
    RememberConnection { user_id: String, channel: ChannelKind },
    OnlineInit { user_id: String },
    Heartbeat,

    // --- friendship ---
    SearchPerson { query: String },
    AddFriendReq { target: String },
    AcceptFreq { time: i64, requester: String },
    RefuseFreq { time: i64, requester: String },
    RemoveFriend { time: i64, other: String },
    BlockFriend { other: String },
    UnblockFriend { other: String },

    // --- group ---
    GroupInvite { group_id: String, name: String, inviter: String },
    GroupJoinRequest { group_id: String, requester: String, command_id: i64 },
    CreateGroup { time: i64, name: String },
    SearchGroup { group_id: String },
    JoinGroupReq { time: i64, group_id: String },
    InviteToGroupReq { time: i64, group_id: String, name: String, invitee: String },
    AcceptGreq { time: i64, command_id: i64 },
    RefuseGreq { time: i64, command_id: i64 },
    LeaveGroup { time: i64, group_id: String },
    DisbandGroup { time: i64, group_id: String },
    RemoveFromGroup { time: i64, group_id: String, member: String },
    AddAdmin { time: i64, group_id: String, member: String },
    RemoveAdmin { time: i64, group_id: String, member: String },

    // --- file ---
    UploadFile { file_name: String, file_hash: String, file_size: u64 },
    DownloadFile { file_id: String },

    // --- server -> client replies / notifications ---
    AcceptLogin { other_identifier: String },
    Refused { reason: String },
    AcceptPostCode,
    SuccessAuth,
    AcceptRegi,
    FriendOnline { user_id: String },
    FriendOffline { user_id: String },
    NotifyExist { id: String, name: Option<String> },
    NotifyNotExist,
    GiveGroupId { group_id: String },
    Success,
    Managed,
    AcceptFile { file_id: String },
    DenyFile { file_hash: String, reason: String, file_id: String },
    AcceptFileReq { file_name: String, file_hash: String, file_size: u64 },
    DenyFileReq { reason: String },
}

/// Identifies which of the three long-lived connections a command concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Msg,
    Cmd,
    Data,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Msg, ChannelKind::Cmd, ChannelKind::Data];

    pub fn index(self) -> usize {
        match self {
            ChannelKind::Msg => 0,
            ChannelKind::Cmd => 1,
            ChannelKind::Data => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Msg => "msg",
            ChannelKind::Cmd => "cmd",
            ChannelKind::Data => "data",
        }
    }
}

// ---------------------------------------------------------------------------
// File transfer (DATA channel)
// ---------------------------------------------------------------------------

/// One fixed-size slice of a file transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_id: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub is_last_chunk: bool,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Sync items (relation net / presence push at ONLINE_INIT)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    #[serde(rename = "type")]
    pub kind: SyncItemKind,
    /// JSON-encoded payload; shape depends on `kind` (see `RelationNetFull` /
    /// `FriendStatusList` below).
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncItemKind {
    RelationNetFull,
    AllFriendStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationNetFull {
    pub friends: Vec<FriendEntry>,
    pub groups: Vec<GroupEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendEntry {
    pub id: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub members: Vec<GroupMemberEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMemberEntry {
    pub id: String,
    pub is_admin: bool,
}

/// `ALL_FRIEND_STATUS` content is `[[friend_id, online], ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FriendStatusList(pub Vec<(String, bool)>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_chat_message_round_trips() {
        let env = Envelope {
            user_id: Some("alice".to_owned()),
            payload: Payload::ChatMessage(ChatMessage {
                sender: "alice".to_owned(),
                receiver: "bob".to_owned(),
                is_group: false,
                timestamp: 1000,
                text: "hi".to_owned(),
                pin: false,
                payload: None,
            }),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn command_request_tags_on_action() {
        let req = CommandRequest {
            action: CommandAction::SignIn {
                principal: "a@b.com".to_owned(),
                pw_hash: "h".to_owned(),
            },
            sender: String::new(),
            args: vec![],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"action\":\"SIGN_IN\""));
        let back: CommandRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn file_chunk_base64_round_trips_arbitrary_bytes() {
        let chunk = FileChunk {
            file_id: "File_1".to_owned(),
            data: vec![0, 1, 2, 253, 254, 255, 10, 13],
            chunk_index: 0,
            total_chunks: 1,
            is_last_chunk: true,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let back: FileChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(chunk, back);
    }

    #[test]
    fn sync_item_relation_net_content_parses_as_json() {
        let net = RelationNetFull {
            friends: vec![FriendEntry { id: "bob".to_owned(), blocked: false }],
            groups: vec![],
        };
        let item = SyncItem {
            kind: SyncItemKind::RelationNetFull,
            content: serde_json::to_string(&net).unwrap(),
            timestamp: 42,
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: SyncItem = serde_json::from_str(&json).unwrap();
        let parsed: RelationNetFull = serde_json::from_str(&back.content).unwrap();
        assert_eq!(parsed, net);
    }

    #[test]
    fn friend_status_list_serializes_as_tuple_array() {
        let list = FriendStatusList(vec![("bob".to_owned(), true), ("carol".to_owned(), false)]);
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"[["bob",true],["carol",false]]"#);
    }
}
