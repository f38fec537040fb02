//! Native tree ensemble - LightGBM text model
//!
//! Parses the booster file written by `Booster.save_model()` and evaluates
//! it. Node covers are kept for the TreeSHAP explainer.

use std::collections::HashMap;

use super::ModelError;

/// Values below this magnitude count as zero for `MissingType::Zero`
const ZERO_THRESHOLD: f64 = 1e-35;

const DECISION_CATEGORICAL: i32 = 1;
const DECISION_DEFAULT_LEFT: i32 = 2;

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingType {
    None,
    Zero,
    NaN,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Numerical {
        threshold: f64,
        default_left: bool,
        missing: MissingType,
    },
    /// Categories going left, as a bitset
    Categorical { bitset: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Split {
        feature: usize,
        decision: Decision,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// One regression tree, root at index 0
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Decision {
    /// True when `value` goes to the left child
    pub fn goes_left(&self, value: f64) -> bool {
        match self {
            Decision::Numerical { threshold, default_left, missing } => {
                let mut value = value;
                if value.is_nan() && *missing != MissingType::NaN {
                    value = 0.0;
                }
                let is_missing = match missing {
                    MissingType::Zero => value.abs() <= ZERO_THRESHOLD,
                    MissingType::NaN => value.is_nan(),
                    MissingType::None => false,
                };
                if is_missing {
                    *default_left
                } else {
                    value <= *threshold
                }
            }
            Decision::Categorical { bitset } => {
                if value.is_nan() || value < 0.0 {
                    return false;
                }
                let category = value as usize;
                bitset
                    .get(category / 32)
                    .map(|word| (word >> (category % 32)) & 1 == 1)
                    .unwrap_or(false)
            }
        }
    }
}

impl Tree {
    /// Child followed by `row` at a split node
    pub fn next(&self, node: usize, row: &[f64]) -> Option<(usize, usize)> {
        match &self.nodes[node] {
            Node::Split { feature, decision, left, right, .. } => {
                let value = row.get(*feature).copied().unwrap_or(f64::NAN);
                if decision.goes_left(value) {
                    Some((*left, *right))
                } else {
                    Some((*right, *left))
                }
            }
            Node::Leaf { .. } => None,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        while let Some((hot, _)) = self.next(node, row) {
            node = hot;
        }
        match self.nodes[node] {
            Node::Leaf { value, .. } => value,
            Node::Split { .. } => unreachable!("traversal stops at a leaf"),
        }
    }

    /// Cover-weighted mean output of the tree
    pub fn expected_value(&self) -> f64 {
        self.node_expectation(0)
    }

    fn node_expectation(&self, node: usize) -> f64 {
        match &self.nodes[node] {
            Node::Leaf { value, .. } => *value,
            Node::Split { left, right, cover, .. } => {
                let lc = self.nodes[*left].cover();
                let rc = self.nodes[*right].cover();
                let total = if *cover > 0.0 { *cover } else { lc + rc };
                if total <= 0.0 {
                    return 0.5 * (self.node_expectation(*left) + self.node_expectation(*right));
                }
                (lc * self.node_expectation(*left) + rc * self.node_expectation(*right)) / total
            }
        }
    }

    pub fn max_depth(&self) -> usize {
        fn depth(tree: &Tree, node: usize) -> usize {
            match &tree.nodes[node] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + depth(tree, *left).max(depth(tree, *right)),
            }
        }
        depth(self, 0)
    }
}

// ============================================================================
// OBJECTIVE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Objective {
    /// `binary` / `cross_entropy`: one output through a sigmoid
    Sigmoid { scale: f64 },
    /// Two-class `multiclass`: softmax over both outputs
    Softmax,
}

impl Objective {
    fn parse(line: &str, num_class: usize) -> Result<Self, ModelError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or("");
        let params: HashMap<&str, &str> = parts.filter_map(|p| p.split_once(':')).collect();

        match name {
            "binary" => {
                let scale = params
                    .get("sigmoid")
                    .map(|s| s.parse::<f64>())
                    .transpose()
                    .map_err(|_| ModelError::Parse(format!("bad sigmoid in objective '{}'", line)))?
                    .unwrap_or(1.0);
                Ok(Objective::Sigmoid { scale })
            }
            "cross_entropy" | "xentropy" => Ok(Objective::Sigmoid { scale: 1.0 }),
            "multiclass" | "softmax" if num_class == 2 => Ok(Objective::Softmax),
            "multiclass" | "softmax" => Err(ModelError::Unsupported(format!(
                "multiclass model with {} classes",
                num_class
            ))),
            other => Err(ModelError::Unsupported(format!("objective '{}'", other))),
        }
    }
}

// ============================================================================
// BOOSTER
// ============================================================================

/// Gradient boosted tree ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct Booster {
    pub feature_names: Vec<String>,
    /// Trees per boosting round; tree `t` feeds output `t % num_outputs`
    pub num_outputs: usize,
    pub objective: Objective,
    pub trees: Vec<Tree>,
}

impl Booster {
    /// Raw margins, one per output
    pub fn predict_raw(&self, row: &[f64]) -> Vec<f64> {
        let mut raw = vec![0.0; self.num_outputs];
        for (t, tree) in self.trees.iter().enumerate() {
            raw[t % self.num_outputs] += tree.predict(row);
        }
        raw
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let raw = self.predict_raw(row);
        match self.objective {
            Objective::Sigmoid { scale } => 1.0 / (1.0 + (-scale * raw[0]).exp()),
            Objective::Softmax => {
                let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = raw.iter().map(|r| (r - max).exp()).collect();
                exps[1] / exps.iter().sum::<f64>()
            }
        }
    }

    /// Cover-weighted mean raw margin, one per output
    pub fn expected_values(&self) -> Vec<f64> {
        let mut expected = vec![0.0; self.num_outputs];
        for (t, tree) in self.trees.iter().enumerate() {
            expected[t % self.num_outputs] += tree.expected_value();
        }
        expected
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Parse a LightGBM text model
    pub fn from_lightgbm_text(text: &str) -> Result<Self, ModelError> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut average_output = false;
        let mut blocks: Vec<HashMap<&str, &str>> = Vec::new();
        let mut current: Option<HashMap<&str, &str>> = None;

        for line in text.lines().map(str::trim) {
            if line == "end of trees" {
                break;
            }
            if line.starts_with("Tree=") {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                current = Some(HashMap::new());
                continue;
            }
            if line.is_empty() {
                continue;
            }
            match (&mut current, line.split_once('=')) {
                (Some(block), Some((k, v))) => {
                    block.insert(k, v);
                }
                (None, Some((k, v))) => {
                    header.insert(k, v);
                }
                (None, None) if line == "average_output" => average_output = true,
                _ => {}
            }
        }
        if let Some(block) = current.take() {
            blocks.push(block);
        }

        let num_class: usize = header_value(&header, "num_class")?;
        let num_outputs: usize = header_value(&header, "num_tree_per_iteration")?;
        let max_feature_idx: usize = header_value(&header, "max_feature_idx")?;
        let objective = Objective::parse(
            header
                .get("objective")
                .ok_or_else(|| ModelError::Parse("missing objective".to_string()))?,
            num_class,
        )?;
        let expected_outputs = match objective {
            Objective::Sigmoid { .. } => 1,
            Objective::Softmax => 2,
        };
        if num_outputs != expected_outputs {
            return Err(ModelError::Unsupported(format!(
                "{} trees per iteration for a {} output model",
                num_outputs, expected_outputs
            )));
        }

        let feature_names: Vec<String> = header
            .get("feature_names")
            .ok_or_else(|| ModelError::Parse("missing feature_names".to_string()))?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if feature_names.len() != max_feature_idx + 1 {
            return Err(ModelError::Parse(format!(
                "{} feature names for max_feature_idx={}",
                feature_names.len(),
                max_feature_idx
            )));
        }

        if blocks.is_empty() {
            return Err(ModelError::Parse("model contains no trees".to_string()));
        }

        let mut trees = blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| parse_tree(block, feature_names.len()).map_err(|e| match e {
                ModelError::Parse(msg) => ModelError::Parse(format!("tree {}: {}", idx, msg)),
                other => other,
            }))
            .collect::<Result<Vec<_>, _>>()?;

        if average_output {
            let rounds = (trees.len() / num_outputs).max(1) as f64;
            for tree in &mut trees {
                for node in &mut tree.nodes {
                    if let Node::Leaf { value, .. } = node {
                        *value /= rounds;
                    }
                }
            }
        }

        Ok(Self {
            feature_names,
            num_outputs,
            objective,
            trees,
        })
    }
}

fn header_value<T: std::str::FromStr>(header: &HashMap<&str, &str>, key: &str) -> Result<T, ModelError> {
    header
        .get(key)
        .ok_or_else(|| ModelError::Parse(format!("missing {}", key)))?
        .parse()
        .map_err(|_| ModelError::Parse(format!("invalid {}", key)))
}

fn array<T: std::str::FromStr>(block: &HashMap<&str, &str>, key: &str, len: usize) -> Result<Vec<T>, ModelError> {
    let raw = block.get(key).copied().unwrap_or("");
    let values = raw
        .split_whitespace()
        .map(|v| v.parse::<T>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ModelError::Parse(format!("invalid value in {}", key)))?;
    if values.len() != len {
        return Err(ModelError::Parse(format!(
            "{} has {} entries, expected {}",
            key,
            values.len(),
            len
        )));
    }
    Ok(values)
}

fn parse_tree(block: &HashMap<&str, &str>, num_features: usize) -> Result<Tree, ModelError> {
    let num_leaves: usize = header_value(block, "num_leaves")?;
    if num_leaves == 0 {
        return Err(ModelError::Parse("num_leaves=0".to_string()));
    }
    if block.get("is_linear").map(|v| *v != "0").unwrap_or(false) {
        return Err(ModelError::Unsupported("linear trees".to_string()));
    }

    let leaf_values: Vec<f64> = array(block, "leaf_value", num_leaves)?;
    if num_leaves == 1 {
        // Single leaf trees carry no counts
        let cover = block
            .get("leaf_count")
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0);
        return Ok(Tree {
            nodes: vec![Node::Leaf { value: leaf_values[0], cover }],
        });
    }

    let num_internal = num_leaves - 1;
    let split_feature: Vec<usize> = array(block, "split_feature", num_internal)?;
    let threshold: Vec<f64> = array(block, "threshold", num_internal)?;
    let decision_type: Vec<i32> = array(block, "decision_type", num_internal)?;
    let left_child: Vec<i64> = array(block, "left_child", num_internal)?;
    let right_child: Vec<i64> = array(block, "right_child", num_internal)?;
    let leaf_count: Vec<f64> = array(block, "leaf_count", num_leaves)?;
    let internal_count: Vec<f64> = array(block, "internal_count", num_internal)?;

    let num_cat: usize = block.get("num_cat").and_then(|v| v.parse().ok()).unwrap_or(0);
    let (cat_boundaries, cat_threshold): (Vec<usize>, Vec<u32>) = if num_cat > 0 {
        let boundaries: Vec<usize> = array(block, "cat_boundaries", num_cat + 1)?;
        let total = *boundaries.last().unwrap_or(&0);
        (boundaries, array(block, "cat_threshold", total)?)
    } else {
        (Vec::new(), Vec::new())
    };

    // Internal children always come after their parent, so traversal terminates
    let child = |parent: usize, c: i64| -> Result<usize, ModelError> {
        if c >= 0 && c as usize <= parent {
            return Err(ModelError::Parse(format!("node {} points back to node {}", parent, c)));
        }
        let idx = if c >= 0 { c as usize } else { num_internal + (!c) as usize };
        if idx >= num_internal + num_leaves {
            return Err(ModelError::Parse(format!("child index {} out of range", c)));
        }
        Ok(idx)
    };

    let mut nodes = Vec::with_capacity(num_internal + num_leaves);
    for i in 0..num_internal {
        if split_feature[i] >= num_features {
            return Err(ModelError::Parse(format!("split on unknown feature {}", split_feature[i])));
        }
        let dt = decision_type[i];
        let decision = if dt & DECISION_CATEGORICAL != 0 {
            let cat_idx = threshold[i] as usize;
            if cat_idx + 1 >= cat_boundaries.len() {
                return Err(ModelError::Parse(format!("categorical split {} out of range", cat_idx)));
            }
            let bitset = cat_threshold
                .get(cat_boundaries[cat_idx]..cat_boundaries[cat_idx + 1])
                .ok_or_else(|| ModelError::Parse("cat_boundaries are not increasing".to_string()))?;
            Decision::Categorical { bitset: bitset.to_vec() }
        } else {
            let missing = match (dt >> 2) & 3 {
                1 => MissingType::Zero,
                2 => MissingType::NaN,
                _ => MissingType::None,
            };
            Decision::Numerical {
                threshold: threshold[i],
                default_left: dt & DECISION_DEFAULT_LEFT != 0,
                missing,
            }
        };
        nodes.push(Node::Split {
            feature: split_feature[i],
            decision,
            left: child(i, left_child[i])?,
            right: child(i, right_child[i])?,
            cover: internal_count[i],
        });
    }
    for (value, cover) in leaf_values.into_iter().zip(leaf_count) {
        nodes.push(Node::Leaf { value, cover });
    }

    Ok(Tree { nodes })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two trees over six features, binary objective
    pub(crate) const SAMPLE_MODEL: &str = include_str!("../../tests/fixtures/model/model.lgb");

    #[test]
    fn test_parse_sample_model() {
        let booster = Booster::from_lightgbm_text(SAMPLE_MODEL).unwrap();
        assert_eq!(booster.num_features(), 6);
        assert_eq!(booster.num_outputs, 1);
        assert_eq!(booster.trees.len(), 2);
        assert_eq!(booster.trees[0].nodes.len(), 5);
        assert_eq!(booster.trees[0].max_depth(), 2);
        assert_eq!(booster.objective, Objective::Sigmoid { scale: 1.0 });
    }

    #[test]
    fn test_predict_follows_splits() {
        let booster = Booster::from_lightgbm_text(SAMPLE_MODEL).unwrap();
        // income 135000 <= 150000, ext 0.3 <= 0.5, children 0 <= 1.5
        let row = [100001.0, 1.0, 0.0, 0.0, 135000.0, 0.3];
        let raw = booster.predict_raw(&row);
        assert!((raw[0] - 0.2).abs() < 1e-12);

        let p = booster.predict_proba(&row);
        assert!((p - 1.0 / (1.0 + (-0.2f64).exp())).abs() < 1e-12);

        // income above split, two children
        let row = [100002.0, 0.0, 1.0, 2.0, 270000.0, 0.3];
        assert!((booster.predict_raw(&row)[0] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_value_routing() {
        let booster = Booster::from_lightgbm_text(SAMPLE_MODEL).unwrap();
        // NaN ext source takes the default-left branch
        let row = [1.0, 0.0, 0.0, 0.0, 100000.0, f64::NAN];
        assert!((booster.predict_raw(&row)[0] - 0.2).abs() < 1e-12);
        // NaN income is treated as zero when the split has no missing type
        let row = [1.0, 0.0, 0.0, 0.0, f64::NAN, 0.9];
        assert!((booster.predict_raw(&row)[0] - (-0.3)).abs() < 1e-12);
    }

    #[test]
    fn test_expected_value_uses_covers() {
        let booster = Booster::from_lightgbm_text(SAMPLE_MODEL).unwrap();
        assert!((booster.trees[0].expected_value() - (-0.05)).abs() < 1e-12);
        assert!((booster.trees[1].expected_value() - (-0.06)).abs() < 1e-12);
        assert!((booster.expected_values()[0] - (-0.11)).abs() < 1e-12);
    }

    #[test]
    fn test_categorical_bitset() {
        let decision = Decision::Categorical { bitset: vec![0b1010, 1] };
        assert!(decision.goes_left(1.0));
        assert!(!decision.goes_left(2.0));
        assert!(decision.goes_left(3.0));
        assert!(decision.goes_left(32.0));
        assert!(!decision.goes_left(64.0));
        assert!(!decision.goes_left(f64::NAN));
        assert!(!decision.goes_left(-1.0));
    }

    #[test]
    fn test_rejects_unsupported_objectives() {
        let regression = SAMPLE_MODEL.replace("objective=binary sigmoid:1", "objective=regression");
        assert!(matches!(
            Booster::from_lightgbm_text(&regression),
            Err(ModelError::Unsupported(_))
        ));

        let three_class = SAMPLE_MODEL
            .replace("objective=binary sigmoid:1", "objective=multiclass num_class:3")
            .replace("num_class=1", "num_class=3");
        assert!(matches!(
            Booster::from_lightgbm_text(&three_class),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_single_leaf_tree() {
        let text = "tree\nnum_class=1\nnum_tree_per_iteration=1\nmax_feature_idx=0\n\
                    objective=binary sigmoid:1\nfeature_names=a\n\n\
                    Tree=0\nnum_leaves=1\nnum_cat=0\nleaf_value=0.25\nshrinkage=1\n\n\nend of trees\n";
        let booster = Booster::from_lightgbm_text(text).unwrap();
        assert_eq!(booster.predict_raw(&[3.0]), vec![0.25]);
        assert_eq!(booster.expected_values(), vec![0.25]);
    }
    fn one_tree_model(tree: &str) -> String {
        format!(
            "tree\nnum_class=1\nnum_tree_per_iteration=1\nmax_feature_idx=0\n\
             objective=binary sigmoid:1\nfeature_names=a\n\nTree=0\n{}\n\nend of trees\n",
            tree
        )
    }

    #[test]
    fn test_rejects_child_pointing_back() {
        let self_loop = SAMPLE_MODEL.replace("left_child=1 -1", "left_child=0 -1");
        assert!(matches!(
            Booster::from_lightgbm_text(&self_loop),
            Err(ModelError::Parse(_))
        ));

        let to_root = SAMPLE_MODEL.replace("left_child=1 -1", "left_child=1 0");
        assert!(matches!(
            Booster::from_lightgbm_text(&to_root),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_empty_tree() {
        let text = one_tree_model("num_leaves=0\nnum_cat=0\nleaf_value=\nshrinkage=1");
        assert!(matches!(
            Booster::from_lightgbm_text(&text),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_decreasing_cat_boundaries() {
        let tree = "num_leaves=2\nnum_cat=2\nsplit_feature=0\nthreshold=0\ndecision_type=1\n\
                    left_child=-1\nright_child=-2\nleaf_value=0.1 -0.1\nleaf_count=5 5\n\
                    internal_count=10\ncat_boundaries=0 2 1\ncat_threshold=5\nshrinkage=1";
        assert!(matches!(
            Booster::from_lightgbm_text(&one_tree_model(tree)),
            Err(ModelError::Parse(_))
        ));

        let valid = tree.replace("cat_boundaries=0 2 1", "cat_boundaries=0 1 1");
        let booster = Booster::from_lightgbm_text(&one_tree_model(&valid)).unwrap();
        // bitset 0b101: categories 0 and 2 go left
        assert_eq!(booster.predict_raw(&[2.0]), vec![0.1]);
        assert_eq!(booster.predict_raw(&[1.0]), vec![-0.1]);
    }
}
