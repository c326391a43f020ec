use serde::Deserialize;
use toml::Value;

/// One `[[evaluators]]` entry of the settings file.
#[derive(Deserialize, Debug, Clone)]
pub struct EvaluatorConfig {
    /// The evaluator kind, e.g. `"ema_crossover"`.
    pub name: String,
    /// Unique id used for voting and weighting. Defaults to `name`.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    // This will hold the `params = { ... }` table from the TOML
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl EvaluatorConfig {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

fn default_weight() -> f64 {
    1.0
}

fn empty_params() -> Value {
    Value::Table(Default::default())
}
