use crate::detect::result::Detection;

/// Post-inference gate applied by the coordinator to every engine result.
///
/// Keeps detections whose lowercased class name contains one of the configured weapon
/// terms and whose confidence meets the threshold the call was dispatched with. Engine
/// outputs that break the `Detection` invariants are dropped and counted.
#[derive(Clone, Debug)]
pub struct WeaponFilter {
    terms: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Filtered {
    pub kept: Vec<Detection>,
    pub not_weapon: usize,
    pub below_threshold: usize,
    pub invalid: usize,
}

impl WeaponFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_weapon(&self, class_name: &str) -> bool {
        let name = class_name.to_lowercase();
        self.terms.iter().any(|term| name.contains(term.as_str()))
    }

    pub fn apply(&self, detections: Vec<Detection>, confidence_threshold: f32) -> Filtered {
        let mut out = Filtered::default();
        for detection in detections {
            if let Err(err) = detection.validate() {
                log::warn!(
                    "dropping invalid engine output ({}): {:?}",
                    err,
                    detection.bbox
                );
                out.invalid += 1;
                continue;
            }
            if detection.confidence < confidence_threshold {
                out.below_threshold += 1;
                continue;
            }
            if !self.is_weapon(&detection.class_name) {
                out.not_weapon += 1;
                continue;
            }
            out.kept.push(detection);
        }
        out
    }
}
