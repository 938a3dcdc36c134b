//! The closed catalogue of business event types and producer sources.
//!
//! Dispatch from a type tag to its category and payload schema goes through [`EventType`], an
//! explicit table, instead of inspecting the shape of the tag string at each call site.

use crate::error::EventError;
use std::fmt;
use std::str::FromStr;

/// Business event type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ProductViewed,
    ProductSearched,
    ProductListed,
    OrderPlaced,
    OrderStatusChecked,
    OrderCompleted,
    OrderFailed,
    SessionStarted,
    SessionEnded,
    CustomerQuery,
    CustomerFeedback,
    InventoryUpdated,
    ProductCreated,
    ProductUpdated,
    ProductDeleted,
    AiRecommendation,
    AiDescriptionGenerated,
    /// Extension tag outside the catalogue. Must be non-empty; use [`EventType::from_tag`].
    Custom(String),
}

/// Coarse grouping of event types; each category shares a payload vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Product,
    Order,
    Customer,
    Admin,
    Ai,
    Other,
}

type CatalogEntry = (EventType, &'static str, EventCategory, &'static [&'static str]);

const KNOWN: &[CatalogEntry] = &[
    (EventType::ProductViewed, "product.viewed", EventCategory::Product, &["product_id"]),
    (EventType::ProductSearched, "product.searched", EventCategory::Product, &["search_query"]),
    (EventType::ProductListed, "product.listed", EventCategory::Product, &["products_listed"]),
    (EventType::OrderPlaced, "order.placed", EventCategory::Order, &["order_id"]),
    (EventType::OrderStatusChecked, "order.status_checked", EventCategory::Order, &["order_id"]),
    (EventType::OrderCompleted, "order.completed", EventCategory::Order, &["order_id"]),
    (EventType::OrderFailed, "order.failed", EventCategory::Order, &["order_id"]),
    (
        EventType::SessionStarted,
        "customer.session_started",
        EventCategory::Customer,
        &["session_id"],
    ),
    (EventType::SessionEnded, "customer.session_ended", EventCategory::Customer, &["session_id"]),
    (EventType::CustomerQuery, "customer.query", EventCategory::Customer, &["query_text"]),
    (EventType::CustomerFeedback, "customer.feedback", EventCategory::Customer, &[]),
    (
        EventType::InventoryUpdated,
        "admin.inventory_updated",
        EventCategory::Admin,
        &["product_id", "previous_quantity", "new_quantity"],
    ),
    (EventType::ProductCreated, "admin.product_created", EventCategory::Admin, &["product_name"]),
    (EventType::ProductUpdated, "admin.product_updated", EventCategory::Admin, &["product_id"]),
    (EventType::ProductDeleted, "admin.product_deleted", EventCategory::Admin, &["product_id"]),
    (EventType::AiRecommendation, "ai.recommendation", EventCategory::Ai, &[]),
    (EventType::AiDescriptionGenerated, "ai.description_generated", EventCategory::Ai, &[]),
];

impl EventType {
    /// Resolve a type tag. Unknown non-empty tags become [`EventType::Custom`].
    pub fn from_tag(tag: &str) -> Result<Self, EventError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(EventError::MissingType);
        }
        let lowered = tag.to_ascii_lowercase();
        Ok(KNOWN
            .iter()
            .find(|(_, name, _, _)| *name == lowered)
            .map(|(ty, _, _, _)| ty.clone())
            .unwrap_or_else(|| EventType::Custom(tag.to_string())))
    }

    /// Wire representation of the tag.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Custom(tag) => tag,
            _ => self.entry().map(|(_, name, _, _)| *name).unwrap_or_default(),
        }
    }

    /// Category used to pick the payload vocabulary.
    pub fn category(&self) -> EventCategory {
        match self {
            EventType::Custom(_) => EventCategory::Other,
            _ => self.entry().map(|(_, _, category, _)| *category).unwrap_or(EventCategory::Other),
        }
    }

    /// Fields that must be present for an event of this type to decode.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EventType::Custom(_) => &[],
            _ => self.entry().map(|(_, _, _, fields)| *fields).unwrap_or(&[]),
        }
    }

    fn entry(&self) -> Option<&'static CatalogEntry> {
        KNOWN.iter().find(|(known, _, _, _)| known == self)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::from_tag(s)
    }
}

/// Producer application or service that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventSource {
    CustomerAgent,
    AdminAgent,
    StoreFront,
    StoreAdmin,
    OrderService,
    ProductService,
    MakelineService,
    HttpApi,
    Custom(String),
}

impl EventSource {
    /// Wire representation of the source.
    pub fn as_str(&self) -> &str {
        match self {
            EventSource::CustomerAgent => "customer-agent",
            EventSource::AdminAgent => "admin-agent",
            EventSource::StoreFront => "store-front",
            EventSource::StoreAdmin => "store-admin",
            EventSource::OrderService => "order-service",
            EventSource::ProductService => "product-service",
            EventSource::MakelineService => "makeline-service",
            EventSource::HttpApi => "http-api",
            EventSource::Custom(name) => name,
        }
    }

    /// Map a service name to a known source, if it is one.
    pub fn from_service_name(name: &str) -> Option<Self> {
        match name.trim() {
            "customer-agent" => Some(EventSource::CustomerAgent),
            "admin-agent" => Some(EventSource::AdminAgent),
            "store-front" => Some(EventSource::StoreFront),
            "store-admin" => Some(EventSource::StoreAdmin),
            "order-service" => Some(EventSource::OrderService),
            "product-service" => Some(EventSource::ProductService),
            "makeline-service" => Some(EventSource::MakelineService),
            "http-api" => Some(EventSource::HttpApi),
            _ => None,
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
