use std::fmt;
use std::str::FromStr;

use derive_more::with_trait::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of a provider search result.
#[derive(Debug, Deserialize, Clone, Display, Serialize, PartialEq, Eq)]
#[display("{title} ({year}) [{imdb_id}]")]
pub struct Candidate {
    #[serde(rename = "imdbID")]
    pub imdb_id: String,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Year", default)]
    pub year: String,
    #[serde(rename = "Poster", default)]
    pub poster: String,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Candidate {
    pub fn new(
        imdb_id: impl Into<String>,
        title: impl Into<String>,
        year: impl Into<String>,
        poster: impl Into<String>,
    ) -> Self {
        Self {
            imdb_id: imdb_id.into(),
            title: title.into(),
            year: year.into(),
            poster: poster.into(),
            kind: None,
        }
    }
}

/// Full movie record: provider metadata plus the editable download links.
///
/// Members the provider or the catalog send that are not modelled here
/// (`Ratings`, `imdbRating`, the catalog's `_id`, ...) are kept in `extra`
/// and written back out unchanged.
#[derive(Debug, Deserialize, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awards: Option<String>,
    #[serde(rename = "imdbID", skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_office: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hd_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_hd_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qhd_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// The identifier, ignoring an empty string.
    pub fn imdb_id(&self) -> Option<&str> {
        self.imdb_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn get(&self, field: RecordField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    /// Overwrites a single field, leaving every other field untouched.
    pub fn set(&mut self, field: RecordField, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    /// The search-result view of this record, if it carries an identifier.
    pub fn to_candidate(&self) -> Option<Candidate> {
        let imdb_id = self.imdb_id()?;
        Some(Candidate {
            imdb_id: imdb_id.to_string(),
            title: self.title.clone().unwrap_or_default(),
            year: self.year.clone().unwrap_or_default(),
            poster: self.poster.clone().unwrap_or_default(),
            kind: self.kind.clone(),
        })
    }

    fn slot(&self, field: RecordField) -> &Option<String> {
        match field {
            RecordField::Poster => &self.poster,
            RecordField::Title => &self.title,
            RecordField::Genre => &self.genre,
            RecordField::Language => &self.language,
            RecordField::Country => &self.country,
            RecordField::Awards => &self.awards,
            RecordField::ImdbId => &self.imdb_id,
            RecordField::Kind => &self.kind,
            RecordField::BoxOffice => &self.box_office,
            RecordField::Year => &self.year,
            RecordField::Rated => &self.rated,
            RecordField::Released => &self.released,
            RecordField::Runtime => &self.runtime,
            RecordField::Director => &self.director,
            RecordField::Writer => &self.writer,
            RecordField::Actors => &self.actors,
            RecordField::Plot => &self.plot,
            RecordField::LowUrl => &self.low_url,
            RecordField::HdUrl => &self.hd_url,
            RecordField::FullHdUrl => &self.full_hd_url,
            RecordField::QhdUrl => &self.qhd_url,
        }
    }

    fn slot_mut(&mut self, field: RecordField) -> &mut Option<String> {
        match field {
            RecordField::Poster => &mut self.poster,
            RecordField::Title => &mut self.title,
            RecordField::Genre => &mut self.genre,
            RecordField::Language => &mut self.language,
            RecordField::Country => &mut self.country,
            RecordField::Awards => &mut self.awards,
            RecordField::ImdbId => &mut self.imdb_id,
            RecordField::Kind => &mut self.kind,
            RecordField::BoxOffice => &mut self.box_office,
            RecordField::Year => &mut self.year,
            RecordField::Rated => &mut self.rated,
            RecordField::Released => &mut self.released,
            RecordField::Runtime => &mut self.runtime,
            RecordField::Director => &mut self.director,
            RecordField::Writer => &mut self.writer,
            RecordField::Actors => &mut self.actors,
            RecordField::Plot => &mut self.plot,
            RecordField::LowUrl => &mut self.low_url,
            RecordField::HdUrl => &mut self.hd_url,
            RecordField::FullHdUrl => &mut self.full_hd_url,
            RecordField::QhdUrl => &mut self.qhd_url,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}]",
            self.title.as_deref().unwrap_or("?"),
            self.year.as_deref().unwrap_or("?"),
            self.imdb_id.as_deref().unwrap_or("-"),
        )
    }
}

/// Addressable fields of a [`Record`], displayed by their wire names.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Hash)]
pub enum RecordField {
    Poster,
    Title,
    Genre,
    Language,
    Country,
    Awards,
    #[display("imdbID")]
    ImdbId,
    #[display("Type")]
    Kind,
    BoxOffice,
    Year,
    Rated,
    Released,
    Runtime,
    Director,
    Writer,
    Actors,
    Plot,
    LowUrl,
    HdUrl,
    FullHdUrl,
    QhdUrl,
}

impl RecordField {
    pub const ALL: [RecordField; 21] = [
        RecordField::Poster,
        RecordField::Title,
        RecordField::Genre,
        RecordField::Language,
        RecordField::Country,
        RecordField::Awards,
        RecordField::ImdbId,
        RecordField::Kind,
        RecordField::BoxOffice,
        RecordField::Year,
        RecordField::Rated,
        RecordField::Released,
        RecordField::Runtime,
        RecordField::Director,
        RecordField::Writer,
        RecordField::Actors,
        RecordField::Plot,
        RecordField::LowUrl,
        RecordField::HdUrl,
        RecordField::FullHdUrl,
        RecordField::QhdUrl,
    ];

    pub const DOWNLOAD_LINKS: [RecordField; 4] = [
        RecordField::LowUrl,
        RecordField::HdUrl,
        RecordField::FullHdUrl,
        RecordField::QhdUrl,
    ];

    pub fn is_download_link(self) -> bool {
        Self::DOWNLOAD_LINKS.contains(&self)
    }

    /// Form label used by the front ends.
    pub fn label(self) -> &'static str {
        match self {
            RecordField::LowUrl => "420p URL",
            RecordField::HdUrl => "HD URL",
            RecordField::FullHdUrl => "Full HD URL",
            RecordField::QhdUrl => "QHD URL",
            RecordField::ImdbId => "imdbID",
            RecordField::Kind => "Type",
            RecordField::BoxOffice => "BoxOffice",
            RecordField::Poster => "Poster",
            RecordField::Title => "Title",
            RecordField::Genre => "Genre",
            RecordField::Language => "Language",
            RecordField::Country => "Country",
            RecordField::Awards => "Awards",
            RecordField::Year => "Year",
            RecordField::Rated => "Rated",
            RecordField::Released => "Released",
            RecordField::Runtime => "Runtime",
            RecordField::Director => "Director",
            RecordField::Writer => "Writer",
            RecordField::Actors => "Actors",
            RecordField::Plot => "Plot",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown record field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for RecordField {
    type Err = UnknownField;

    /// Accepts the wire name in any case, so `HdUrl`, `hdurl` and `imdbid` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RecordField::ALL
            .into_iter()
            .find(|field| field.to_string().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}
