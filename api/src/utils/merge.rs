use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use serde_json::{Map, Value};

/// The fields of the app's container that are derived from the app spec.
/// When one of these is missing from a newly derived deployment, the app no
/// longer asks for it, so the copy on disk must not keep it either.
const OWNED_CONTAINER_FIELDS: &[&str] = &[
	"image",
	"ports",
	"env",
	"resources",
	"livenessProbe",
	"readinessProbe",
	"volumeMounts",
];

/// Recursively merges `new` onto `old`. Values present in `new` win, values
/// only present in `old` are kept.
///
/// Maps merge key by key. Lists whose elements are all maps with a string
/// `name` (containers, env vars, ports) merge element by element: elements
/// are matched by name, follow the order of `new`, and elements only `old`
/// has are appended after them. Every other list is replaced.
pub fn deep_merge(old: &mut Value, new: Value) {
	match (old, new) {
		(Value::Object(old), Value::Object(new)) => {
			for (key, value) in new {
				match old.get_mut(&key) {
					Some(existing) => deep_merge(existing, value),
					None => {
						old.insert(key, value);
					}
				}
			}
		}
		(Value::Array(old), Value::Array(new)) if is_named_list(old.as_slice()) && is_named_list(&new) => {
			let mut remaining = std::mem::take(old);
			for value in new {
				let name = element_name(&value).map(str::to_string);
				let position = remaining
					.iter()
					.position(|existing| element_name(existing) == name.as_deref());
				match position {
					Some(position) => {
						let mut existing = remaining.remove(position);
						deep_merge(&mut existing, value);
						old.push(existing);
					}
					None => old.push(value),
				}
			}
			old.extend(remaining);
		}
		(old, new) => *old = new,
	}
}

/// Whether every element of a list is a map with a string `name`
fn is_named_list(list: &[Value]) -> bool {
	list.iter().all(|value| element_name(value).is_some())
}

/// The `name` of a list element, if it has one
fn element_name(value: &Value) -> Option<&str> {
	value.get("name").and_then(Value::as_str)
}

/// Merges a deployment derived from an app spec onto the one already in the
/// repository. Fields the app spec does not model, such as the replica count,
/// extra annotations or sidecar containers, are kept from the existing
/// document. Fields derived from the app spec are taken from the new document
/// only, so that removing something from the app spec removes it from the
/// deployment.
pub fn merge_deployment(
	existing: &Deployment,
	derived: &Deployment,
) -> Result<Deployment, serde_json::Error> {
	let mut merged = serde_json::to_value(existing)?;
	let container_name = derived.metadata.name.as_deref().unwrap_or_default();

	if let Some(pod) = merged.pointer_mut("/spec/template/spec").and_then(Value::as_object_mut) {
		clear_owned_volumes(pod, container_name);
		if let Some(containers) = pod.get_mut("containers").and_then(Value::as_array_mut) {
			containers
				.iter_mut()
				.filter(|container| element_name(container) == Some(container_name))
				.filter_map(Value::as_object_mut)
				.for_each(|container| clear_fields(container, OWNED_CONTAINER_FIELDS));
		}
	}

	deep_merge(&mut merged, serde_json::to_value(derived)?);
	serde_json::from_value(merged)
}

/// Removes the pod volumes the app owns: those backed by a persistent volume
/// claim, and those the app's container mounts. Volumes only other containers
/// use are kept.
fn clear_owned_volumes(pod: &mut Map<String, Value>, container_name: &str) {
	let mounted = pod
		.get("containers")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter(|container| element_name(container) == Some(container_name))
		.filter_map(|container| container.get("volumeMounts").and_then(Value::as_array))
		.flatten()
		.filter_map(element_name)
		.map(str::to_string)
		.collect::<BTreeSet<_>>();

	let Some(volumes) = pod.get_mut("volumes").and_then(Value::as_array_mut) else {
		return;
	};
	volumes.retain(|volume| {
		volume.get("persistentVolumeClaim").is_none() &&
			!element_name(volume).is_some_and(|name| mounted.contains(name))
	});
	if volumes.is_empty() {
		pod.remove("volumes");
	}
}

/// Removes the given keys from a map
fn clear_fields(map: &mut Map<String, Value>, fields: &[&str]) {
	for field in fields {
		map.remove(*field);
	}
}
