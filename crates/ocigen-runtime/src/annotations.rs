//! Standard lifecycle annotations.

use chrono::SecondsFormat;
use ocigen_common::constants::{ANNOTATION_CONTAINER_MANAGER, ANNOTATION_CREATED, ANNOTATION_STOP_SIGNAL};
use ocigen_common::container::ContainerDescriptor;
use ocigen_common::spec::Spec;

/// Sets the creation time, stop signal, and manager annotations.
///
/// A manager annotation already present in the template is kept.
pub fn apply_lifecycle_annotations(
    spec: &mut Spec,
    descriptor: &ContainerDescriptor,
    stop_signal: u32,
    manager_name: &str,
) {
    spec.add_annotation(
        ANNOTATION_CREATED,
        descriptor.created.to_rfc3339_opts(SecondsFormat::Nanos, true),
    );
    spec.add_annotation(ANNOTATION_STOP_SIGNAL, stop_signal.to_string());
    if !spec.annotations.contains_key(ANNOTATION_CONTAINER_MANAGER) {
        spec.add_annotation(ANNOTATION_CONTAINER_MANAGER, manager_name);
    }
}
