// Matrix Expansion
// Expands strategy.matrix declarations into concrete job instances

use crate::workflow::models::{Matrix, Strategy, Value};

use std::collections::HashMap;

/// One concrete combination of matrix values.
#[derive(Debug, Clone)]
pub struct MatrixInstance {
    /// Display name, e.g. `test (linux, 18)` - or the bare job id when
    /// the job has no matrix
    pub name: String,
    /// The values bound to `matrix.<key>` for this instance
    pub values: HashMap<String, Value>,
}

/// Expand a job's strategy into its instances.
///
/// Dimension keys are processed in sorted order so the produced instance
/// list is deterministic. A job without a matrix yields exactly one
/// instance with empty matrix context.
pub fn expand(job_id: &str, strategy: Option<&Strategy>) -> Vec<MatrixInstance> {
    let Some(matrix) = strategy.and_then(|s| s.matrix.as_ref()) else {
        return vec![MatrixInstance {
            name: job_id.to_string(),
            values: HashMap::new(),
        }];
    };

    let mut combinations = cartesian_product(matrix);
    apply_excludes(&mut combinations, matrix);
    apply_includes(&mut combinations, matrix);

    if combinations.is_empty() {
        // Everything excluded still leaves the job with one bare instance
        return vec![MatrixInstance {
            name: job_id.to_string(),
            values: HashMap::new(),
        }];
    }

    combinations
        .into_iter()
        .map(|values| MatrixInstance {
            name: instance_name(job_id, &values),
            values,
        })
        .collect()
}

fn sorted_keys(matrix: &Matrix) -> Vec<&String> {
    let mut keys: Vec<&String> = matrix.dimensions.keys().collect();
    keys.sort();
    keys
}

fn cartesian_product(matrix: &Matrix) -> Vec<HashMap<String, Value>> {
    let keys = sorted_keys(matrix);
    if keys.is_empty() {
        return Vec::new();
    }

    let mut combos: Vec<HashMap<String, Value>> = vec![HashMap::new()];
    for key in keys {
        let values = &matrix.dimensions[key];
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(key.clone(), Value::from_json(value));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Remove combinations whose values match every key of an exclude entry.
fn apply_excludes(combos: &mut Vec<HashMap<String, Value>>, matrix: &Matrix) {
    for exclude in &matrix.exclude {
        combos.retain(|combo| {
            !exclude
                .iter()
                .all(|(k, v)| combo.get(k) == Some(&Value::from_json(v)))
        });
    }
}

/// Apply include entries: an entry whose dimension-key values match
/// existing combinations extends those combinations with its extra keys;
/// otherwise it is appended as a new instance.
fn apply_includes(combos: &mut Vec<HashMap<String, Value>>, matrix: &Matrix) {
    for include in &matrix.include {
        let entry: HashMap<String, Value> = include
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect();

        if matrix.dimensions.is_empty() {
            // Include-only matrix: every entry is its own instance
            combos.push(entry);
            continue;
        }

        let mut matched = false;
        for combo in combos.iter_mut() {
            let matches = entry
                .iter()
                .filter(|(k, _)| matrix.dimensions.contains_key(*k))
                .all(|(k, v)| combo.get(k) == Some(v));
            if matches {
                matched = true;
                for (k, v) in &entry {
                    if !matrix.dimensions.contains_key(k) {
                        combo.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        if !matched {
            combos.push(entry);
        }
    }
}

fn instance_name(job_id: &str, values: &HashMap<String, Value>) -> String {
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys.iter().map(|k| values[*k].as_string()).collect();
    if parts.is_empty() {
        job_id.to_string()
    } else {
        format!("{} ({})", job_id, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::models::Workflow;

    fn strategy_from(yaml: &str) -> Strategy {
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        workflow.jobs["test"].strategy.clone().unwrap()
    }

    fn values(instance: &MatrixInstance, key: &str) -> String {
        instance.values[key].as_string()
    }

    #[test]
    fn test_no_matrix_yields_single_instance() {
        let instances = expand("build", None);
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name, "build");
        assert!(instances[0].values.is_empty());
    }

    #[test]
    fn test_cartesian_product() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        ver: [1, 2]
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 4);
        let combos: Vec<(String, String)> = instances
            .iter()
            .map(|i| (values(i, "os"), values(i, "ver")))
            .collect();
        assert!(combos.contains(&("a".to_string(), "1".to_string())));
        assert!(combos.contains(&("a".to_string(), "2".to_string())));
        assert!(combos.contains(&("b".to_string(), "1".to_string())));
        assert!(combos.contains(&("b".to_string(), "2".to_string())));
    }

    #[test]
    fn test_exclude_removes_matching_subset() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        ver: [1, 2]
        exclude:
          - os: a
            ver: 1
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 3);
        assert!(!instances
            .iter()
            .any(|i| values(i, "os") == "a" && values(i, "ver") == "1"));
    }

    #[test]
    fn test_exclude_partial_key_subset() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        ver: [1, 2]
        exclude:
          - os: b
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| values(i, "os") == "a"));
    }

    #[test]
    fn test_include_extends_matching_combinations() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        include:
          - os: a
            flag: extra
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 2);
        let with_flag: Vec<_> = instances
            .iter()
            .filter(|i| i.values.contains_key("flag"))
            .collect();
        assert_eq!(with_flag.len(), 1);
        assert_eq!(values(with_flag[0], "os"), "a");
    }

    #[test]
    fn test_include_appends_unmatched_combination() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        include:
          - os: c
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 3);
        assert!(instances.iter().any(|i| values(i, "os") == "c"));
    }

    #[test]
    fn test_include_only_matrix() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        include:
          - os: a
          - os: b
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_instance_names_are_deterministic() {
        let strategy = strategy_from(
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        ver: [18]
        os: [linux]
    steps:
      - run: echo hi
"#,
        );
        let instances = expand("test", Some(&strategy));

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].name, "test (linux, 18)");
    }
}
