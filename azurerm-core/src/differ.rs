//! Differ - Compare desired configuration with current state to generate a Plan
//!
//! Compares the desired configuration with the state last read from the
//! control plane and generates the list of required Effects (Plan).
//! Changes to force-new attributes turn an update into a replacement.

use std::collections::HashMap;

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceAddress, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute differs -> needs replacement
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceAddress),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired configuration with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.address.clone());
    }

    let replace = schema.is_some_and(|s| changed.iter().any(|name| s.is_force_new(name)));
    if replace {
        Diff::Replace {
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(key, _)| !schema.is_some_and(|s| s.is_computed(key)))
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

/// Compute Diff for multiple resources and generate a Plan
///
/// States whose address is no longer desired are scheduled for deletion.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceAddress, State>,
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        let current = current_states
            .get(&resource.address)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.address.clone()));

        match diff(resource, &current, schemas.get(&resource.address.resource_type)) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                from,
                to,
                changed_attributes,
            }),
            Diff::Replace {
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                from,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let mut orphans: Vec<&State> = current_states
        .values()
        .filter(|s| s.exists && !desired.iter().any(|r| r.address == s.address))
        .collect();
    orphans.sort_by(|a, b| a.address.cmp(&b.address));
    for state in orphans {
        if let Some(ref identifier) = state.identifier {
            plan.add(Effect::Delete {
                address: state.address.clone(),
                identifier: identifier.clone(),
            });
        }
    }

    plan
}

/// Plan deleting every tracked resource, in reverse of the given order
pub fn create_destroy_plan(states: &[State]) -> Plan {
    let mut plan = Plan::new();
    for state in states.iter().rev() {
        if let (true, Some(identifier)) = (state.exists, state.identifier.as_ref()) {
            plan.add(Effect::Delete {
                address: state.address.clone(),
                identifier: identifier.clone(),
            });
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("azurerm_servicebus_geo_dr_configuration")
            .attribute(AttributeSchema::new("name", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("partner_namespace_id", AttributeType::String))
            .attribute(AttributeSchema::new("role", AttributeType::String).computed())
    }

    fn existing(attrs: &[(&str, &str)]) -> State {
        let attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();
        State::existing(
            ResourceAddress::new("azurerm_servicebus_geo_dr_configuration", "dr"),
            attributes,
        )
        .with_identifier("/subscriptions/0/resourceGroups/rg/providers/Microsoft.ServiceBus/namespaces/ns/disasterRecoveryConfigs/dr")
    }

    fn desired(attrs: &[(&str, &str)]) -> Resource {
        attrs.iter().fold(
            Resource::new("azurerm_servicebus_geo_dr_configuration", "dr"),
            |r, (k, v)| r.with_attribute(*k, *v),
        )
    }

    #[test]
    fn diff_create_when_not_exists() {
        let current = State::not_found(ResourceAddress::new("azurerm_servicebus_geo_dr_configuration", "dr"));
        let result = diff(&desired(&[("name", "dr")]), &current, Some(&schema()));
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_computed_attributes() {
        let current = existing(&[("name", "dr"), ("role", "Primary")]);
        let result = diff(&desired(&[("name", "dr")]), &current, Some(&schema()));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_update_when_mutable_attribute_changes() {
        let current = existing(&[("name", "dr"), ("partner_namespace_id", "a")]);
        let result = diff(
            &desired(&[("name", "dr"), ("partner_namespace_id", "b")]),
            &current,
            Some(&schema()),
        );
        match result {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["partner_namespace_id".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_when_force_new_attribute_changes() {
        let current = existing(&[("name", "dr"), ("partner_namespace_id", "a")]);
        let result = diff(
            &desired(&[("name", "dr2"), ("partner_namespace_id", "b")]),
            &current,
            Some(&schema()),
        );
        match result {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["name", "partner_namespace_id"]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn create_plan_schedules_orphans_for_deletion() {
        let mut current_states = HashMap::new();
        let orphan = State::existing(ResourceAddress::new("azurerm_app_service_extension", "old"), HashMap::new())
            .with_identifier("/subscriptions/0/resourceGroups/rg/providers/Microsoft.Web/sites/web/siteextensions/old");
        current_states.insert(orphan.address.clone(), orphan);
        let current = existing(&[("name", "dr"), ("partner_namespace_id", "a")]);
        current_states.insert(current.address.clone(), current);

        let mut schemas = HashMap::new();
        schemas.insert(schema().resource_type.clone(), schema());

        let resources = vec![
            desired(&[("name", "dr"), ("partner_namespace_id", "b")]),
            Resource::new("azurerm_app_service_extension", "new"),
        ];
        let plan = create_plan(&resources, &current_states, &schemas);

        assert_eq!(plan.effects().len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Update { .. }));
        assert!(matches!(plan.effects()[1], Effect::Create(_)));
        assert!(matches!(plan.effects()[2], Effect::Delete { .. }));
    }

    #[test]
    fn destroy_plan_reverses_order_and_skips_untracked() {
        let a = existing(&[("name", "a")]);
        let mut b = existing(&[("name", "b")]);
        b.address.name = "b".to_string();
        let missing = State::not_found(ResourceAddress::new("t", "missing"));

        let plan = create_destroy_plan(&[a, b, missing]);
        assert_eq!(plan.effects().len(), 2);
        assert_eq!(plan.effects()[0].address().name, "b");
        assert_eq!(plan.effects()[1].address().name, "dr");
    }
}
