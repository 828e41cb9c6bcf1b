use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cipher::{CipherError, FieldCipher};
use crate::error::ExportError;
use crate::record::{MemberRow, NonrespondentRow};
use crate::source::{CursorSource, ReminderFilter, StreamScope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberListSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySeed {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub member_list_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSeed {
    pub id: String,
    pub survey_id: String,
    pub member_id: String,
    #[serde(default)]
    pub submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSeed {
    pub survey_id: String,
    pub member_id: String,
}

/// Seed file contents for [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedData {
    #[serde(default)]
    pub member_lists: Vec<MemberListSeed>,
    #[serde(default)]
    pub members: Vec<MemberRow>,
    #[serde(default)]
    pub surveys: Vec<SurveySeed>,
    #[serde(default)]
    pub responses: Vec<ResponseSeed>,
    #[serde(default)]
    pub reminders: Vec<ReminderSeed>,
}

impl SeedData {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Seals every member PII field that is not sealed yet. Returns the
    /// number of fields sealed.
    pub fn seal_members(&mut self, cipher: &dyn FieldCipher) -> Result<usize, CipherError> {
        let mut sealed = 0;
        for member in &mut self.members {
            for field in [
                &mut member.lot,
                &mut member.name,
                &mut member.email,
                &mut member.address,
            ] {
                if field.is_empty() || cipher.open(field).is_ok() {
                    continue;
                }
                *field = cipher.seal(field)?;
                sealed += 1;
            }
        }
        Ok(sealed)
    }
}

/// Persistence collaborator over an immutable seed, ordered by id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: BTreeSet<String>,
    members: BTreeMap<String, MemberRow>,
    surveys: BTreeMap<String, SurveySeed>,
    responses: BTreeMap<String, ResponseSeed>,
    reminders: HashMap<(String, String), u32>,
}

impl MemoryStore {
    pub fn new(seed: SeedData) -> Self {
        let mut lists: BTreeSet<String> =
            seed.member_lists.into_iter().map(|list| list.id).collect();
        lists.extend(seed.members.iter().map(|member| member.list_id.clone()));

        let mut reminders = HashMap::new();
        for reminder in seed.reminders {
            *reminders
                .entry((reminder.survey_id, reminder.member_id))
                .or_insert(0) += 1;
        }

        Self {
            lists,
            members: seed
                .members
                .into_iter()
                .map(|member| (member.id.clone(), member))
                .collect(),
            surveys: seed
                .surveys
                .into_iter()
                .map(|survey| (survey.id.clone(), survey))
                .collect(),
            responses: seed
                .responses
                .into_iter()
                .map(|response| (response.id.clone(), response))
                .collect(),
            reminders,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn require_list(&self, list_id: &str) -> Result<(), ExportError> {
        if self.lists.contains(list_id) {
            Ok(())
        } else {
            Err(ExportError::not_found("member list", list_id))
        }
    }

    fn require_survey(&self, survey_id: &str) -> Result<(), ExportError> {
        if self.surveys.contains_key(survey_id) {
            Ok(())
        } else {
            Err(ExportError::not_found("survey", survey_id))
        }
    }

    fn reminder_count(&self, survey_id: &str, member_id: &str) -> u32 {
        self.reminders
            .get(&(survey_id.to_string(), member_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Reminders sent to a member across the surveys run on `list_id`.
    fn member_reminder_total(&self, list_id: &str, member_id: &str) -> u32 {
        self.reminders
            .iter()
            .filter(|((survey_id, member), _)| {
                member == member_id
                    && self
                        .surveys
                        .get(survey_id)
                        .is_some_and(|survey| survey.member_list_id == list_id)
            })
            .map(|(_, count)| *count)
            .sum()
    }

    fn list_members<'a>(
        &'a self,
        scope: &'a StreamScope,
        after: Option<&str>,
    ) -> impl Iterator<Item = &'a MemberRow> + 'a {
        self.members
            .range::<str, _>(lower_bound(after))
            .map(|(_, member)| member)
            .filter(move |member| {
                member.list_id == scope.collection_id && scope.admits(&member.id)
            })
    }

    fn nonrespondents<'a>(
        &'a self,
        survey_id: &'a str,
        after: Option<&str>,
    ) -> impl Iterator<Item = NonrespondentRow> + 'a {
        self.responses
            .range::<str, _>(lower_bound(after))
            .map(|(_, response)| response)
            .filter(move |response| response.survey_id == survey_id && !response.submitted)
            .filter_map(move |response| {
                let member = self.members.get(&response.member_id)?;
                Some(NonrespondentRow {
                    response_id: response.id.clone(),
                    survey_id: response.survey_id.clone(),
                    member: member.clone(),
                    reminder_count: self.reminder_count(survey_id, &response.member_id),
                })
            })
    }
}

fn lower_bound(after: Option<&str>) -> (Bound<&str>, Bound<&str>) {
    match after {
        Some(after) => (Bound::Excluded(after), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[async_trait]
impl CursorSource<MemberRow> for MemoryStore {
    async fn count(&self, scope: &StreamScope, after: Option<&str>) -> Result<u64, ExportError> {
        self.require_list(&scope.collection_id)?;
        Ok(self.list_members(scope, after).count() as u64)
    }

    async fn fetch(
        &self,
        scope: &StreamScope,
        after: Option<&str>,
        take: usize,
    ) -> Result<Vec<MemberRow>, ExportError> {
        self.require_list(&scope.collection_id)?;
        Ok(self.list_members(scope, after).take(take).cloned().collect())
    }

    async fn reminder_allow_list(
        &self,
        collection_id: &str,
        filter: ReminderFilter,
    ) -> Result<BTreeSet<String>, ExportError> {
        self.require_list(collection_id)?;
        let scope = StreamScope::new(collection_id);
        Ok(self
            .list_members(&scope, None)
            .filter(|member| filter.matches(self.member_reminder_total(collection_id, &member.id)))
            .map(|member| member.id.clone())
            .collect())
    }
}

#[async_trait]
impl CursorSource<NonrespondentRow> for MemoryStore {
    async fn count(&self, scope: &StreamScope, after: Option<&str>) -> Result<u64, ExportError> {
        self.require_survey(&scope.collection_id)?;
        Ok(self
            .nonrespondents(&scope.collection_id, after)
            .filter(|row| scope.admits(&row.response_id))
            .count() as u64)
    }

    async fn fetch(
        &self,
        scope: &StreamScope,
        after: Option<&str>,
        take: usize,
    ) -> Result<Vec<NonrespondentRow>, ExportError> {
        self.require_survey(&scope.collection_id)?;
        Ok(self
            .nonrespondents(&scope.collection_id, after)
            .filter(|row| scope.admits(&row.response_id))
            .take(take)
            .collect())
    }

    async fn reminder_allow_list(
        &self,
        collection_id: &str,
        filter: ReminderFilter,
    ) -> Result<BTreeSet<String>, ExportError> {
        self.require_survey(collection_id)?;
        Ok(self
            .nonrespondents(collection_id, None)
            .filter(|row| filter.matches(row.reminder_count))
            .map(|row| row.response_id)
            .collect())
    }
}
