//! Derived views (statistics, alerts, status) and which mutations make them
//! stale.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::cache::{CacheKey, KeyFilter, ResourceType, Scope};

pub const KIND_STATS: &str = "stats";
pub const KIND_BY_CATEGORY: &str = "byCategory";
pub const KIND_STATUS: &str = "status";
pub const KIND_ALERTS: &str = "alerts";
pub const KIND_UPCOMING: &str = "upcoming";
pub const KIND_TODAY: &str = "today";

pub fn expense_stats_key(pet_id: Option<&str>) -> CacheKey {
    CacheKey::from_value(
        ResourceType::Expenses,
        Scope::Derived,
        json!({ "kind": KIND_STATS, "petId": pet_id }),
    )
}

pub fn expenses_by_category_key(pet_id: Option<&str>) -> CacheKey {
    CacheKey::from_value(
        ResourceType::Expenses,
        Scope::Derived,
        json!({ "kind": KIND_BY_CATEGORY, "petId": pet_id }),
    )
}

/// Status of one budget. The category is part of the key so that expense
/// changes can find the statuses they affect.
pub fn budget_status_key(budget_id: &str, category: &str) -> CacheKey {
    CacheKey::from_value(
        ResourceType::Budgets,
        Scope::Derived,
        json!({ "kind": KIND_STATUS, "budgetId": budget_id, "category": category }),
    )
}

pub fn budget_alerts_key() -> CacheKey {
    CacheKey::from_value(ResourceType::Budgets, Scope::Derived, json!({ "kind": KIND_ALERTS }))
}

fn derived(resource: ResourceType) -> KeyFilter {
    KeyFilter::resource(resource).scope(Scope::Derived)
}

fn field_values<'a>(field: &str, records: &[Option<&'a Value>]) -> BTreeSet<&'a str> {
    records
        .iter()
        .flatten()
        .filter_map(|r| r.get(field).and_then(Value::as_str))
        .collect()
}

/// Filters of every derived entry whose inputs change when a record of
/// `resource` goes from `before` to `after` (`None` = absent).
pub fn derived_invalidations(
    resource: ResourceType,
    before: Option<&Value>,
    after: Option<&Value>,
) -> Vec<KeyFilter> {
    let records = [before, after];
    let mut filters = Vec::new();

    match resource {
        ResourceType::Expenses => {
            filters.push(derived(ResourceType::Expenses));

            let categories = field_values("category", &records);
            if categories.is_empty() {
                filters.push(derived(ResourceType::Budgets).qualifier(json!({ "kind": KIND_STATUS })));
            }
            // Old and new category both lose their budget status
            for category in categories {
                filters.push(
                    derived(ResourceType::Budgets)
                        .qualifier(json!({ "kind": KIND_STATUS, "category": category })),
                );
            }
            filters.push(derived(ResourceType::Budgets).qualifier(json!({ "kind": KIND_ALERTS })));
        }
        ResourceType::Budgets => {
            for id in field_values("id", &records) {
                filters.push(
                    derived(ResourceType::Budgets)
                        .qualifier(json!({ "kind": KIND_STATUS, "budgetId": id })),
                );
            }
            filters.push(derived(ResourceType::Budgets).qualifier(json!({ "kind": KIND_ALERTS })));
        }
        ResourceType::Pets => {
            filters.push(derived(ResourceType::Pets));
            if after.is_none() {
                // Everything scoped to a deleted pet is gone server-side
                for pet_id in field_values("id", &records) {
                    for other in ResourceType::ALL {
                        if other != ResourceType::Pets {
                            filters.push(
                                KeyFilter::resource(other).qualifier(json!({ "petId": pet_id })),
                            );
                        }
                    }
                }
            }
        }
        ResourceType::HealthRecords | ResourceType::Events | ResourceType::FeedingSchedules => {
            filters.push(derived(resource));
        }
    }

    filters
}
