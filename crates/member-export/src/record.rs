use serde::{Deserialize, Serialize};

use crate::cipher::{FieldCipher, decrypt_or_raw};

/// A stored row that can be streamed. The cursor is the row's stable sort
/// key; `open` decrypts PII into the projection sent to clients.
pub trait ExportRow: Send + Sync + 'static {
    type Record: Serialize + Send;

    /// Name of the cursor field in the emitted record.
    const CURSOR_FIELD: &'static str;

    fn cursor(&self) -> &str;

    fn open(self, cipher: &dyn FieldCipher) -> Self::Record;
}

/// Member as stored: `lot`, `name`, `email` and `address` are sealed at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub id: String,
    pub list_id: String,
    pub lot: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub lot: String,
    pub name: String,
    pub email: String,
    pub address: String,
}

impl ExportRow for MemberRow {
    type Record = MemberRecord;
    const CURSOR_FIELD: &'static str = "id";

    fn cursor(&self) -> &str {
        &self.id
    }

    fn open(self, cipher: &dyn FieldCipher) -> MemberRecord {
        MemberRecord {
            lot: decrypt_or_raw(cipher, "lot", &self.lot),
            name: decrypt_or_raw(cipher, "name", &self.name),
            email: decrypt_or_raw(cipher, "email", &self.email),
            address: decrypt_or_raw(cipher, "address", &self.address),
            id: self.id,
        }
    }
}

/// Unsubmitted response joined with its member.
#[derive(Debug, Clone, PartialEq)]
pub struct NonrespondentRow {
    pub response_id: String,
    pub survey_id: String,
    pub member: MemberRow,
    pub reminder_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonrespondentRecord {
    pub response_id: String,
    pub member_id: String,
    pub lot: String,
    pub name: String,
    pub email: String,
    pub address: String,
    pub reminder_count: u32,
}

impl ExportRow for NonrespondentRow {
    type Record = NonrespondentRecord;
    const CURSOR_FIELD: &'static str = "responseId";

    fn cursor(&self) -> &str {
        &self.response_id
    }

    fn open(self, cipher: &dyn FieldCipher) -> NonrespondentRecord {
        let member = self.member.open(cipher);
        NonrespondentRecord {
            response_id: self.response_id,
            member_id: member.id,
            lot: member.lot,
            name: member.name,
            email: member.email,
            address: member.address,
            reminder_count: self.reminder_count,
        }
    }
}
