//! Classifiers mapping normalized landmark features to sign labels.
//!
//! Two implementations are available:
//! - [`OnnxClassifier`] runs a feed-forward network exported to `.onnx` with `tract`. The network
//!   takes a `[1, NUM_FEATURES]` input and produces one score per label.
//! - [`TemplateClassifier`] votes among the `k` nearest recorded templates. It needs no model
//!   and is what `hand_sender --record` produces data for.
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{bail, Context, Result};
use common::landmarks::{Template, NUM_FEATURES};
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tolerance when checking whether scores already sum up to one.
const PROB_SUM_TOLERANCE: f32 = 1.0e-3;

/// Label with the classifier's confidence in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Scored {
    pub label: String,
    pub confidence: f32,
}

pub trait Classifier: Send + Sync {
    /// Classify one flattened feature vector.
    fn classify(&self, features: &[f32]) -> Result<Scored>;

    /// Expected length of the feature vector.
    fn num_features(&self) -> usize;
}

pub struct OnnxClassifier {
    model: NnModel,
    labels: Vec<String>,
}

impl OnnxClassifier {
    pub fn new(model_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result<Self> {
        let labels = load_labels(labels_path)?;
        let model = get_classifier_model(model_path.as_ref())?;
        log::info!(
            "Loaded classifier {:?} with {} labels",
            model_path.as_ref(),
            labels.len()
        );

        Ok(Self { model, labels })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, features: &[f32]) -> Result<Scored> {
        check_len(features, NUM_FEATURES)?;

        let input: Tensor =
            tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), features.to_vec())?.into();
        let inputs: TVec<TValue> = tvec!(input.into());
        let raw_nn_out = self.model.run(inputs)?;

        let scores: Vec<f32> = raw_nn_out[0]
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();
        if scores.len() != self.labels.len() {
            bail!(
                "model produced {} scores for {} labels",
                scores.len(),
                self.labels.len()
            );
        }

        let probs = as_probabilities(&scores);
        let (idx, confidence) = argmax(&probs).context("model produced no scores")?;

        Ok(Scored {
            label: self.labels[idx].clone(),
            confidence,
        })
    }

    fn num_features(&self) -> usize {
        NUM_FEATURES
    }
}

fn get_classifier_model(path: &Path) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, NUM_FEATURES));
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Read one label per line, skipping blank lines.
fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("failed to open labels file {:?}", path.as_ref()))?;

    let mut labels = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let label = line.trim();
        if !label.is_empty() {
            labels.push(label.to_owned());
        }
    }

    if labels.is_empty() {
        bail!("no labels in {:?}", path.as_ref());
    }

    Ok(labels)
}

/// Nearest-neighbour classifier over recorded templates.
pub struct TemplateClassifier {
    templates: Vec<Template>,
    k: usize,
    num_features: usize,
}

impl TemplateClassifier {
    pub fn new(templates: Vec<Template>, k: usize) -> Result<Self> {
        if k == 0 {
            bail!("k must be at least 1");
        }

        let num_features = match templates.first() {
            Some(template) => template.features.len(),
            None => bail!("no templates given"),
        };
        if let Some(template) = templates
            .iter()
            .find(|t| t.features.len() != num_features)
        {
            bail!(
                "template {:?} has {} features, expected {}",
                &template.label,
                template.features.len(),
                num_features
            );
        }

        Ok(Self {
            templates,
            k,
            num_features,
        })
    }

    /// Load templates stored as JSON Lines.
    ///
    /// Templates must hold the `NUM_FEATURES` values the data socket produces per hand.
    pub fn from_path(path: impl AsRef<Path>, k: usize) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open templates file {:?}", path.as_ref()))?;

        let mut templates = Vec::new();
        for (line_idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let template: Template = serde_json::from_str(&line)
                .with_context(|| format!("invalid template on line {}", line_idx + 1))?;
            templates.push(template);
        }

        log::info!(
            "Loaded {} templates from {:?}",
            templates.len(),
            path.as_ref()
        );

        let classifier = Self::new(templates, k)?;
        if classifier.num_features != NUM_FEATURES {
            bail!(
                "templates in {:?} have {} features, expected {}",
                path.as_ref(),
                classifier.num_features,
                NUM_FEATURES
            );
        }

        Ok(classifier)
    }
}

impl Classifier for TemplateClassifier {
    fn classify(&self, features: &[f32]) -> Result<Scored> {
        check_len(features, self.num_features)?;

        let mut by_distance: Vec<(f32, &str)> = self
            .templates
            .iter()
            .map(|t| (squared_distance(features, &t.features), t.label.as_str()))
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));

        let neighbours = &by_distance[..self.k.min(by_distance.len())];

        // Votes and rank of the closest template per label
        let mut votes: HashMap<&str, (usize, usize)> = HashMap::new();
        for (rank, (_, label)) in neighbours.iter().enumerate() {
            votes
                .entry(*label)
                .and_modify(|(count, _)| *count += 1)
                .or_insert((1, rank));
        }

        let (label, (count, _)) = votes
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
            .context("no neighbours found")?;

        Ok(Scored {
            label: label.to_owned(),
            confidence: count as f32 / neighbours.len() as f32,
        })
    }

    fn num_features(&self) -> usize {
        self.num_features
    }
}

fn check_len(features: &[f32], expected: usize) -> Result<()> {
    if features.len() != expected {
        bail!("expected {} features, got {}", expected, features.len());
    }
    Ok(())
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Return scores unchanged if they already form a probability distribution, else apply softmax.
fn as_probabilities(scores: &[f32]) -> Vec<f32> {
    let in_unit_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    let sum: f32 = scores.iter().sum();
    if in_unit_range && (sum - 1.0).abs() < PROB_SUM_TOLERANCE {
        return scores.to_vec();
    }

    softmax(scores)
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .cloned()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod test {

    use super::*;

    fn template(label: &str, features: Vec<f32>) -> Template {
        Template {
            label: label.into(),
            features,
        }
    }

    #[test]
    fn test_nearest_template_wins_with_k_1() -> Result<()> {
        let classifier = TemplateClassifier::new(
            vec![
                template("A", vec![0.0, 0.0]),
                template("B", vec![10.0, 10.0]),
            ],
            1,
        )?;

        let scored = classifier.classify(&[9.0, 8.5])?;
        assert_eq!(scored.label, "B");
        assert_eq!(scored.confidence, 1.0);

        Ok(())
    }

    #[test]
    fn test_majority_vote() -> Result<()> {
        let classifier = TemplateClassifier::new(
            vec![
                template("A", vec![0.0]),
                template("B", vec![1.0]),
                template("B", vec![1.2]),
                template("A", vec![50.0]),
            ],
            3,
        )?;

        let scored = classifier.classify(&[0.1])?;
        assert_eq!(scored.label, "B");
        assert!((scored.confidence - 2.0 / 3.0).abs() < 1e-6);

        Ok(())
    }

    #[test]
    fn test_tie_goes_to_closest() -> Result<()> {
        let classifier = TemplateClassifier::new(
            vec![template("A", vec![0.0]), template("B", vec![3.0])],
            2,
        )?;

        let scored = classifier.classify(&[2.0])?;
        assert_eq!(scored.label, "B");
        assert_eq!(scored.confidence, 0.5);

        Ok(())
    }

    #[test]
    fn test_k_larger_than_templates() -> Result<()> {
        let classifier = TemplateClassifier::new(vec![template("A", vec![0.0, 1.0])], 5)?;

        let scored = classifier.classify(&[3.0, 3.0])?;
        assert_eq!(scored.label, "A");
        assert_eq!(scored.confidence, 1.0);

        Ok(())
    }

    #[test]
    fn test_wrong_feature_length_is_rejected() -> Result<()> {
        let classifier = TemplateClassifier::new(vec![template("A", vec![0.0, 1.0])], 1)?;
        assert!(classifier.classify(&[0.0]).is_err());

        Ok(())
    }

    #[test]
    fn test_invalid_template_sets() {
        assert!(TemplateClassifier::new(vec![], 1).is_err());
        assert!(TemplateClassifier::new(vec![template("A", vec![0.0])], 0).is_err());
        assert!(TemplateClassifier::new(
            vec![template("A", vec![0.0]), template("B", vec![0.0, 1.0])],
            1
        )
        .is_err());
    }

    fn write_templates(name: &str, templates: &[Template]) -> Result<std::path::PathBuf> {
        let path = std::env::temp_dir().join(format!(
            "sign_server_classifier_{}_{}.jsonl",
            name,
            std::process::id()
        ));
        let lines: Vec<String> = templates
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;
        std::fs::write(&path, lines.join("\n"))?;

        Ok(path)
    }

    #[test]
    fn test_templates_from_path() -> Result<()> {
        let path = write_templates(
            "hand",
            &[
                template("A", vec![0.0; NUM_FEATURES]),
                template("B", vec![1.0; NUM_FEATURES]),
            ],
        )?;
        let classifier = TemplateClassifier::from_path(&path, 1);
        std::fs::remove_file(&path)?;

        let scored = classifier?.classify(&[0.9; NUM_FEATURES])?;
        assert_eq!(scored.label, "B");

        Ok(())
    }

    #[test]
    fn test_templates_with_other_width_are_rejected() -> Result<()> {
        // Flattened 3D landmarks
        let path = write_templates("width", &[template("A", vec![0.0; 63])])?;
        let classifier = TemplateClassifier::from_path(&path, 1);
        std::fs::remove_file(&path)?;

        assert!(classifier.is_err());

        Ok(())
    }

    #[test]
    fn test_probabilities_pass_through() {
        let probs = as_probabilities(&[0.1, 0.7, 0.2]);
        assert_eq!(probs, vec![0.1, 0.7, 0.2]);
    }

    #[test]
    fn test_logits_get_softmax() {
        let probs = as_probabilities(&[2.0, 1.0, -1.0]);
        let sum: f32 = probs.iter().sum();

        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
        assert_eq!(argmax(&probs).map(|(idx, _)| idx), Some(0));
    }
}
