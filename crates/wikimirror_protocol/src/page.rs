//! Page snapshots.
//!
//! [`RawPage`] mirrors one element of the `pages` object returned by
//! `action=query&prop=info|pageprops&inprop=protection`. Boolean flags such
//! as `redirect`, `new`, `missing` and `cascade` are encoded by key presence
//! (`"redirect": ""`), which is what the `flag` helpers below decode.
//!
//! A raw page is turned into a [`PageState`] with [`RawPage::validate`],
//! which is where missing mandatory fields are detected.

use crate::error::ShapeError;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier assigned to a page by the remote wiki.
pub type PageId = i64;

/// One page as returned by the remote API, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPage {
    /// Page id. Absent for titles that do not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pageid: Option<PageId>,
    /// Namespace number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<i32>,
    /// Full title including the namespace prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The page does not exist (anymore).
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub missing: bool,
    /// The page is a redirect.
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub redirect: bool,
    /// The page has a single revision.
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub new: bool,
    /// Last time the page was touched (edited or re-rendered).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<Timestamp>,
    /// Id of the latest revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastrevid: Option<i64>,
    /// Length of the latest revision in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    /// Content model of the latest revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contentmodel: Option<String>,
    /// Page language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagelanguage: Option<String>,
    /// Page properties; absent when the page has none.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pageprops: BTreeMap<String, String>,
    /// Protection entries, including cascaded ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection: Option<Vec<RawRestriction>>,
}

/// One entry of the `protection` list of a raw page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRestriction {
    /// Restricted action (`edit`, `move`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Required user group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Expiry timestamp or `infinity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    /// Cascading protection was requested on this page.
    #[serde(default, with = "flag", skip_serializing_if = "is_false")]
    pub cascade: bool,
    /// Title of the page whose cascading protection causes this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A validated page restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restriction {
    /// Restricted action.
    pub kind: String,
    /// Required user group.
    pub level: String,
    /// Whether the protection cascades to transcluded pages.
    pub cascade: bool,
    /// Expiry timestamp or `infinity`.
    pub expiry: String,
    /// Origin of a cascaded restriction.
    pub source: Option<String>,
}

impl Restriction {
    /// Returns true if the restriction is inherited from another page's
    /// cascading protection rather than applied to this page directly.
    pub fn is_cascaded(&self) -> bool {
        self.source.is_some()
    }
}

/// A validated snapshot of an existing page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot {
    /// Page id.
    pub page_id: PageId,
    /// Namespace number.
    pub namespace: i32,
    /// Full title as reported by the API.
    pub title: String,
    /// The page is a redirect.
    pub is_redirect: bool,
    /// The page has a single revision.
    pub is_new: bool,
    /// Last touched timestamp.
    pub touched: Timestamp,
    /// Latest revision id.
    pub latest_revision: i64,
    /// Length in bytes.
    pub length: i64,
    /// Content model.
    pub content_model: String,
    /// Language code.
    pub language: String,
    /// Page properties.
    pub properties: BTreeMap<String, String>,
    /// All restrictions, cascaded ones included.
    pub restrictions: Vec<Restriction>,
}

impl PageSnapshot {
    /// Restrictions applied directly to this page.
    pub fn direct_restrictions(&self) -> impl Iterator<Item = &Restriction> {
        self.restrictions.iter().filter(|r| !r.is_cascaded())
    }

    /// Names of the properties present in the snapshot.
    pub fn property_names(&self) -> BTreeSet<String> {
        self.properties.keys().cloned().collect()
    }

    /// Types of the directly applied restrictions.
    pub fn restriction_types(&self) -> BTreeSet<String> {
        self.direct_restrictions().map(|r| r.kind.clone()).collect()
    }
}

/// The state of one page as observed on the remote wiki.
#[derive(Debug, Clone, PartialEq)]
pub enum PageState {
    /// The page exists.
    Present(PageSnapshot),
    /// The page no longer exists.
    Missing {
        /// Id the page had.
        page_id: PageId,
    },
}

impl PageState {
    /// Id of the page this state describes.
    pub fn page_id(&self) -> PageId {
        match self {
            PageState::Present(snapshot) => snapshot.page_id,
            PageState::Missing { page_id } => *page_id,
        }
    }
}

impl RawPage {
    /// Validates the raw page and converts it into a [`PageState`].
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] naming the first mandatory field that is
    /// absent. A missing page only needs its `pageid`.
    pub fn validate(self) -> Result<PageState, ShapeError> {
        let page_id = self.pageid.ok_or(ShapeError::missing(None, "pageid"))?;
        if self.missing {
            return Ok(PageState::Missing { page_id });
        }

        let require = |field: &'static str| ShapeError::missing(Some(page_id), field);

        let restrictions = self
            .protection
            .ok_or_else(|| require("protection"))?
            .into_iter()
            .map(|raw| {
                Ok(Restriction {
                    kind: raw.kind.ok_or_else(|| require("protection.type"))?,
                    level: raw.level.ok_or_else(|| require("protection.level"))?,
                    expiry: raw.expiry.ok_or_else(|| require("protection.expiry"))?,
                    cascade: raw.cascade,
                    source: raw.source,
                })
            })
            .collect::<Result<Vec<_>, ShapeError>>()?;

        Ok(PageState::Present(PageSnapshot {
            page_id,
            namespace: self.ns.ok_or_else(|| require("ns"))?,
            title: self.title.ok_or_else(|| require("title"))?,
            is_redirect: self.redirect,
            is_new: self.new,
            touched: self.touched.ok_or_else(|| require("touched"))?,
            latest_revision: self.lastrevid.ok_or_else(|| require("lastrevid"))?,
            length: self.length.ok_or_else(|| require("length"))?,
            content_model: self.contentmodel.ok_or_else(|| require("contentmodel"))?,
            language: self.pagelanguage.ok_or_else(|| require("pagelanguage"))?,
            properties: self.pageprops,
            restrictions,
        }))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Presence-encoded boolean flags.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        if *value {
            serializer.serialize_str("")
        } else {
            serializer.serialize_bool(false)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(!matches!(value, Value::Null | Value::Bool(false)))
    }
}
