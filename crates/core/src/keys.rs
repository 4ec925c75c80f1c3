//! Keys derived from a span
//!
//! Every index row is keyed by something computed from the span rather than
//! stored on it:
//!
//! - [`service_names`]: partition key of the service, span-name and duration
//!   indexes, and of both dimension tables
//! - [`annotation_keys`]: partition key of the annotation index
//! - [`uniqueness_key`]: last clustering column of the fact row, so two
//!   reports of the same span id with different annotations are both kept
//!
//! ## Annotation Key Format
//!
//! | Source | Key |
//! |--------|-----|
//! | Annotation (non-core) | `service:value` |
//! | Binary annotation | `service:key` |
//! | String binary annotation | `service:key` and `service:key:value` |

use crate::span::{Annotation, AnnotationType, BinaryAnnotation, Endpoint, Span, CORE_ANNOTATIONS};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

/// Service names of a span. Most spans have one or two.
pub type ServiceNames = SmallVec<[String; 2]>;

/// Distinct non-empty service names across all endpoints, sorted.
pub fn service_names(span: &Span) -> ServiceNames {
    let mut names: ServiceNames = span
        .endpoints()
        .map(|ep| ep.service_name.to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Annotation index keys, de-duplicated in order of first appearance.
///
/// Core annotations and annotations without a named endpoint are skipped.
pub fn annotation_keys(span: &Span) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut push = |key: String| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    for a in &span.annotations {
        if CORE_ANNOTATIONS.contains(&a.value.as_str()) {
            continue;
        }
        if let Some(service) = named_service(a.endpoint.as_ref()) {
            push(format!("{}:{}", service, a.value));
        }
    }

    for b in &span.binary_annotations {
        let Some(service) = named_service(b.endpoint.as_ref()) else {
            continue;
        };
        push(format!("{}:{}", service, b.key));
        if b.annotation_type == AnnotationType::String {
            push(format!("{}:{}:{}", service, b.key, String::from_utf8_lossy(&b.value)));
        }
    }

    keys
}

/// `{span_id}_{annotations hash}_{binary annotations hash}`
pub fn uniqueness_key(span: &Span) -> String {
    format!(
        "{}_{}_{}",
        span.id,
        hash_annotations(&span.annotations),
        hash_binary_annotations(&span.binary_annotations)
    )
}

/// Stable hash of an annotation list.
pub fn hash_annotations(annotations: &[Annotation]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(annotations.len() as u32).to_le_bytes());
    for a in annotations {
        hasher.update(&a.timestamp.to_le_bytes());
        update_str(&mut hasher, &a.value);
        update_endpoint(&mut hasher, a.endpoint.as_ref());
    }
    hasher.digest()
}

/// Stable hash of a binary annotation list.
pub fn hash_binary_annotations(binary_annotations: &[BinaryAnnotation]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(binary_annotations.len() as u32).to_le_bytes());
    for b in binary_annotations {
        update_str(&mut hasher, &b.key);
        hasher.update(&(b.value.len() as u32).to_le_bytes());
        hasher.update(&b.value);
        hasher.update(&[b.annotation_type.code()]);
        update_endpoint(&mut hasher, b.endpoint.as_ref());
    }
    hasher.digest()
}

fn named_service(endpoint: Option<&Endpoint>) -> Option<String> {
    endpoint
        .map(|ep| ep.service_name.to_lowercase())
        .filter(|name| !name.is_empty())
}

// Length-prefixed so ("ab", "c") and ("a", "bc") hash differently.
fn update_str(hasher: &mut Xxh3, s: &str) {
    hasher.update(&(s.len() as u32).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn update_endpoint(hasher: &mut Xxh3, endpoint: Option<&Endpoint>) {
    match endpoint {
        None => hasher.update(&[0]),
        Some(ep) => {
            hasher.update(&[1]);
            update_str(hasher, &ep.service_name);
            hasher.update(&ep.ipv4.to_le_bytes());
            match ep.port {
                None => hasher.update(&[0]),
                Some(port) => {
                    hasher.update(&[1]);
                    hasher.update(&port.to_le_bytes());
                }
            }
        }
    }
}
