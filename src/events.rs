//! Constructors for the catalogued business events.
//!
//! Each function returns an [`Event`] carrying the fields its type requires; callers add the
//! optional payload with [`Event::with`].

use crate::catalog::EventType;
use crate::event::{now_rfc3339, Event};
use serde_json::Value;

pub fn product_viewed(product_id: impl Into<String>, product_name: impl Into<String>) -> Event {
    Event::new(EventType::ProductViewed)
        .with("product_id", product_id.into())
        .with("product_name", product_name.into())
}

pub fn product_searched(
    query: impl Into<String>,
    results_count: u64,
    product_ids: Option<Vec<String>>,
) -> Event {
    Event::new(EventType::ProductSearched)
        .with("search_query", query.into())
        .with("search_results_count", results_count)
        .with("products_listed", product_ids)
}

pub fn products_listed(
    product_ids: Vec<String>,
    page: Option<u32>,
    page_size: Option<u32>,
) -> Event {
    Event::new(EventType::ProductListed)
        .with("products_listed", product_ids)
        .with("listing_page", page)
        .with("listing_page_size", page_size)
}

/// `order.placed`; `item_count` is derived from `items`.
pub fn order_placed(order_id: impl Into<String>, items: Vec<Value>, total: f64) -> Event {
    let item_count = items.len() as u64;
    Event::new(EventType::OrderPlaced)
        .with("order_id", order_id.into())
        .with("order_items", items)
        .with("order_total", total)
        .with("item_count", item_count)
        .with("order_placed_at", now_rfc3339())
}

pub fn order_status_checked(order_id: impl Into<String>, status: impl Into<String>) -> Event {
    Event::new(EventType::OrderStatusChecked)
        .with("order_id", order_id.into())
        .with("order_status", status.into())
}

pub fn order_completed(order_id: impl Into<String>, processing_duration_ms: Option<u64>) -> Event {
    Event::new(EventType::OrderCompleted)
        .with("order_id", order_id.into())
        .with("order_status", "completed")
        .with("order_completed_at", now_rfc3339())
        .with("processing_duration_ms", processing_duration_ms)
}

pub fn session_started(session_id: impl Into<String>, user_id: Option<String>) -> Event {
    Event::new(EventType::SessionStarted)
        .with("session_id", session_id.into())
        .with("user_id", user_id)
}

pub fn session_ended(
    session_id: impl Into<String>,
    duration_ms: Option<u64>,
    interaction_count: Option<u64>,
) -> Event {
    Event::new(EventType::SessionEnded)
        .with("session_id", session_id.into())
        .with("session_duration_ms", duration_ms)
        .with("interaction_count", interaction_count)
}

pub fn customer_query(query_text: impl Into<String>) -> Event {
    Event::new(EventType::CustomerQuery).with("query_text", query_text.into())
}

/// `admin.inventory_updated`; `quantity_change` is derived from the two quantities.
pub fn inventory_updated(
    product_id: impl Into<String>,
    product_name: impl Into<String>,
    previous_quantity: i64,
    new_quantity: i64,
) -> Event {
    Event::new(EventType::InventoryUpdated)
        .with("product_id", product_id.into())
        .with("product_name", product_name.into())
        .with("previous_quantity", previous_quantity)
        .with("new_quantity", new_quantity)
        .with("quantity_change", new_quantity - previous_quantity)
}

pub fn ai_recommendation(model_name: impl Into<String>, request_type: impl Into<String>) -> Event {
    Event::new(EventType::AiRecommendation)
        .with("model_name", model_name.into())
        .with("model_provider", "azure-openai")
        .with("request_type", request_type.into())
}
