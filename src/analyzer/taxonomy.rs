//! The fixed page-classification taxonomy

use crate::error::{CrawlError, Result};

/// Every classification the engine can assign to a fetched page.
///
/// The set is closed: unknown tags are rejected at the boundary rather
/// than carried as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageKind {
    Article,
    Nav,
    Hub,
    PlaceHub,
    PlacePlaceHub,
    TopicHub,
    PlaceTopicHub,
    PlacePlaceTopicHub,
    Index,
    Listing,
    Category,
    Error,
    Redirect,
    ApiResponse,
    Image,
    Video,
    Audio,
    Document,
    Pdf,
    Unknown,
}

impl PageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Nav => "nav",
            Self::Hub => "hub",
            Self::PlaceHub => "place-hub",
            Self::PlacePlaceHub => "place-place-hub",
            Self::TopicHub => "topic-hub",
            Self::PlaceTopicHub => "place-topic-hub",
            Self::PlacePlaceTopicHub => "place-place-topic-hub",
            Self::Index => "index",
            Self::Listing => "listing",
            Self::Category => "category",
            Self::Error => "error",
            Self::Redirect => "redirect",
            Self::ApiResponse => "api-response",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Pdf => "pdf",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "article" => Ok(Self::Article),
            "nav" => Ok(Self::Nav),
            "hub" => Ok(Self::Hub),
            "place-hub" => Ok(Self::PlaceHub),
            "place-place-hub" => Ok(Self::PlacePlaceHub),
            "topic-hub" => Ok(Self::TopicHub),
            "place-topic-hub" => Ok(Self::PlaceTopicHub),
            "place-place-topic-hub" => Ok(Self::PlacePlaceTopicHub),
            "index" => Ok(Self::Index),
            "listing" => Ok(Self::Listing),
            "category" => Ok(Self::Category),
            "error" => Ok(Self::Error),
            "redirect" => Ok(Self::Redirect),
            "api-response" => Ok(Self::ApiResponse),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            "pdf" => Ok(Self::Pdf),
            "unknown" => Ok(Self::Unknown),
            other => Err(CrawlError::InvalidInput(format!(
                "unknown classification {other:?}"
            ))),
        }
    }

    /// Hub-family kinds link out rather than being read
    #[must_use]
    pub fn is_hub(&self) -> bool {
        matches!(
            self,
            Self::Hub
                | Self::PlaceHub
                | Self::PlacePlaceHub
                | Self::TopicHub
                | Self::PlaceTopicHub
                | Self::PlacePlaceTopicHub
        )
    }

    /// Kinds that count toward article milestones and the host news score
    #[must_use]
    pub fn is_article_like(&self) -> bool {
        matches!(self, Self::Article)
    }
}

impl std::fmt::Display for PageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_parse() {
        for kind in [
            PageKind::Article,
            PageKind::Nav,
            PageKind::Hub,
            PageKind::PlaceHub,
            PageKind::PlacePlaceHub,
            PageKind::TopicHub,
            PageKind::PlaceTopicHub,
            PageKind::PlacePlaceTopicHub,
            PageKind::Index,
            PageKind::Listing,
            PageKind::Category,
            PageKind::Error,
            PageKind::Redirect,
            PageKind::ApiResponse,
            PageKind::Image,
            PageKind::Video,
            PageKind::Audio,
            PageKind::Document,
            PageKind::Pdf,
            PageKind::Unknown,
        ] {
            assert_eq!(PageKind::parse(kind.as_str()).expect("parse"), kind);
        }
        assert!(PageKind::parse("blog").is_err());
    }
}
