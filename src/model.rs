//! The cat record served by the demo service.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::service::Patch;
use crate::traits::Entity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cat {
    pub id:         String,
    #[serde(default)]
    pub name:       String,
    #[serde(default)]
    pub date_birth: DateTime<Utc>,
    #[serde(default)]
    pub vaccinated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl Cat {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            id:         id.into(),
            name:       name.into(),
            date_birth: DateTime::<Utc>::UNIX_EPOCH,
            vaccinated: false,
            image_path: None,
        }
    }

    pub fn born(mut self, date_birth: DateTime<Utc>) -> Self {
        self.date_birth = date_birth;
        self
    }

    pub fn vaccinated(mut self, vaccinated: bool) -> Self {
        self.vaccinated = vaccinated;
        self
    }
}

impl Entity for Cat {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }
}

/// Partial update of a [`Cat`]. Only the fields that are set get changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatPatch {
    pub name:       Option<String>,
    pub date_birth: Option<DateTime<Utc>>,
    pub vaccinated: Option<bool>,
}

impl Patch<Cat> for CatPatch {
    fn apply_to(self, cat: &mut Cat) {
        if let Some(name) = self.name {
            cat.name = name;
        }
        if let Some(date_birth) = self.date_birth {
            cat.date_birth = date_birth;
        }
        if let Some(vaccinated) = self.vaccinated {
            cat.vaccinated = vaccinated;
        }
    }
}
