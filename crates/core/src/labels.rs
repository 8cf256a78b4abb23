//! Kubernetes label/annotation maps rendered as exposition label pairs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::LabelVec;

static INVALID_LABEL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("static regex"));

/// Replace every character that is not valid in a label name with `_`.
pub fn sanitize_label_name(s: &str) -> String {
    INVALID_LABEL_CHARS.replace_all(s, "_").into_owned()
}

/// Keys become `<prefix><sanitized key>`, sorted by original key.
/// When two keys sanitize to the same name, the first one in key order wins.
pub fn to_prometheus_labels<'a, I>(prefix: &str, map: I) -> (LabelVec, LabelVec)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut pairs: Vec<(&String, &String)> = map.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut keys = LabelVec::with_capacity(pairs.len());
    let mut values = LabelVec::with_capacity(pairs.len());
    for (k, v) in pairs {
        let key = format!("{prefix}{}", sanitize_label_name(k));
        if keys.contains(&key) {
            continue;
        }
        keys.push(key);
        values.push(v.clone());
    }
    (keys, values)
}

pub fn kube_labels_to_prometheus_labels<'a, I>(labels: I) -> (LabelVec, LabelVec)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    to_prometheus_labels("label_", labels)
}

pub fn kube_annotations_to_prometheus_annotations<'a, I>(annotations: I) -> (LabelVec, LabelVec)
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    to_prometheus_labels("annotation_", annotations)
}
