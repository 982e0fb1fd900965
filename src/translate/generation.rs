//! Autoregressive decoding over a step function that yields next-token
//! logits for a decoder prefix. Kept free of any runtime types so the search
//! itself can be tested with synthetic logits.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::interface::LoadError;

/// Decoding settings for one model
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub decoder_start_token_id: i64,
    pub eos_token_id: i64,
    /// Upper bound on decoder length, start token and EOS included.
    pub max_length: usize,
    pub num_beams: usize,
    pub length_penalty: f32,
    pub banned_token_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    /// Generated ids without the decoder start token and EOS.
    pub tokens: Vec<i64>,
    pub score: f32,
}

#[derive(Debug, Default, Deserialize)]
struct RawGenerationConfig {
    decoder_start_token_id: Option<i64>,
    eos_token_id: Option<OneOrMany>,
    pad_token_id: Option<i64>,
    max_length: Option<usize>,
    num_beams: Option<usize>,
    length_penalty: Option<f32>,
    bad_words_ids: Option<Vec<Vec<i64>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(i64),
    Many(Vec<i64>),
}

impl OneOrMany {
    fn first(&self) -> Option<i64> {
        match self {
            OneOrMany::One(id) => Some(*id),
            OneOrMany::Many(ids) => ids.first().copied(),
        }
    }
}

impl RawGenerationConfig {
    fn read(path: &Path) -> Result<Option<Self>, LoadError> {
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| LoadError::ModelConfig {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Fields set in `other` take precedence.
    fn overlay(self, other: RawGenerationConfig) -> Self {
        Self {
            decoder_start_token_id: other.decoder_start_token_id.or(self.decoder_start_token_id),
            eos_token_id: other.eos_token_id.or(self.eos_token_id),
            pad_token_id: other.pad_token_id.or(self.pad_token_id),
            max_length: other.max_length.or(self.max_length),
            num_beams: other.num_beams.or(self.num_beams),
            length_penalty: other.length_penalty.or(self.length_penalty),
            bad_words_ids: other.bad_words_ids.or(self.bad_words_ids),
        }
    }
}

impl GenerationParams {
    /// Read `config.json` and `generation_config.json` from a model
    /// directory. `max_sequence_length` caps the decoder length.
    pub fn from_model_dir(dir: &Path, max_sequence_length: usize) -> Result<Self, LoadError> {
        let config_path = dir.join("config.json");
        let base = RawGenerationConfig::read(&config_path)?
            .ok_or_else(|| LoadError::MissingFile(config_path.clone()))?;
        let raw = match RawGenerationConfig::read(&dir.join("generation_config.json"))? {
            Some(generation) => base.overlay(generation),
            None => base,
        };

        Self::resolve(raw, max_sequence_length).map_err(|message| LoadError::Generation {
            path: config_path,
            message,
        })
    }

    fn resolve(raw: RawGenerationConfig, max_sequence_length: usize) -> Result<Self, String> {
        let eos_token_id = raw
            .eos_token_id
            .as_ref()
            .and_then(OneOrMany::first)
            .ok_or("eos_token_id is missing")?;
        // Marian starts decoding from the pad token.
        let decoder_start_token_id = raw
            .decoder_start_token_id
            .or(raw.pad_token_id)
            .ok_or("decoder_start_token_id is missing")?;

        let max_length = raw
            .max_length
            .unwrap_or(max_sequence_length)
            .min(max_sequence_length);
        if max_length < 2 {
            return Err(format!("max_length {max_length} leaves no room for output"));
        }

        let banned_token_ids = raw
            .bad_words_ids
            .unwrap_or_default()
            .into_iter()
            .filter_map(|ids| match ids.as_slice() {
                [id] if *id != eos_token_id => Some(*id),
                _ => None,
            })
            .collect();

        Ok(Self {
            decoder_start_token_id,
            eos_token_id,
            max_length,
            num_beams: raw.num_beams.unwrap_or(1).max(1),
            length_penalty: raw.length_penalty.unwrap_or(1.0),
            banned_token_ids,
        })
    }

    fn normalize(&self, sum_logprobs: f32, length: usize) -> f32 {
        sum_logprobs / (length as f32).powf(self.length_penalty)
    }

    /// Log-probabilities for the next token after a prefix of `prefix_len`
    /// ids, with banned tokens masked and EOS forced on the last slot.
    fn step_scores(&self, logits: &[f32], prefix_len: usize) -> Vec<f32> {
        let mut scores = log_softmax(logits);
        for &id in &self.banned_token_ids {
            if let Some(score) = usize::try_from(id).ok().and_then(|i| scores.get_mut(i)) {
                *score = f32::NEG_INFINITY;
            }
        }
        if prefix_len + 1 >= self.max_length {
            let eos = self.eos_token_id as usize;
            for (i, score) in scores.iter_mut().enumerate() {
                if i != eos {
                    *score = f32::NEG_INFINITY;
                }
            }
        }
        scores
    }
}

/// Run decoding. `next_logits` receives the full decoder prefix (start token
/// first) and returns logits for the following position. Hypotheses are
/// returned best-first.
pub fn generate<F, E>(params: &GenerationParams, next_logits: F) -> Result<Vec<Hypothesis>, E>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>, E>,
{
    if params.num_beams <= 1 {
        greedy(params, next_logits)
    } else {
        beam_search(params, next_logits)
    }
}

fn greedy<F, E>(params: &GenerationParams, mut next_logits: F) -> Result<Vec<Hypothesis>, E>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>, E>,
{
    let mut tokens = vec![params.decoder_start_token_id];
    let mut sum_logprobs = 0.0;

    loop {
        let logits = next_logits(&tokens)?;
        let scores = params.step_scores(&logits, tokens.len());
        let Some((token, logprob)) = top_k(&scores, 1).into_iter().next() else {
            break;
        };
        sum_logprobs += logprob;
        if token == params.eos_token_id {
            break;
        }
        tokens.push(token);
        if tokens.len() >= params.max_length {
            break;
        }
    }

    let length = tokens.len();
    tokens.remove(0);
    Ok(vec![Hypothesis {
        tokens,
        score: params.normalize(sum_logprobs, length),
    }])
}

struct Beam {
    tokens: Vec<i64>,
    sum_logprobs: f32,
}

fn beam_search<F, E>(params: &GenerationParams, mut next_logits: F) -> Result<Vec<Hypothesis>, E>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>, E>,
{
    let num_beams = params.num_beams;
    let mut live = vec![Beam {
        tokens: vec![params.decoder_start_token_id],
        sum_logprobs: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    while !live.is_empty() {
        let mut candidates: Vec<(usize, i64, f32)> = Vec::new();
        for (index, beam) in live.iter().enumerate() {
            let logits = next_logits(&beam.tokens)?;
            let scores = params.step_scores(&logits, beam.tokens.len());
            for (token, logprob) in top_k(&scores, 2 * num_beams) {
                candidates.push((index, token, beam.sum_logprobs + logprob));
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next: Vec<Beam> = Vec::with_capacity(num_beams);
        for (rank, (index, token, sum_logprobs)) in candidates.into_iter().enumerate() {
            let parent = &live[index];
            if token == params.eos_token_id {
                // EOS only counts when it ranks among the top beams.
                if rank < num_beams {
                    finished.push(Hypothesis {
                        tokens: parent.tokens[1..].to_vec(),
                        score: params.normalize(sum_logprobs, parent.tokens.len()),
                    });
                    finished.sort_by(|a, b| b.score.total_cmp(&a.score));
                    finished.truncate(num_beams);
                }
                continue;
            }
            let mut tokens = parent.tokens.clone();
            tokens.push(token);
            next.push(Beam { tokens, sum_logprobs });
            if next.len() == num_beams {
                break;
            }
        }

        let done = match (next.first(), finished.last()) {
            (Some(best), Some(worst)) if finished.len() >= num_beams => {
                worst.score >= params.normalize(best.sum_logprobs, best.tokens.len())
            }
            _ => false,
        };
        if done {
            next.clear();
        }
        live = next;
    }

    Ok(finished)
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let log_sum = logits
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - max).exp())
        .sum::<f32>()
        .ln();
    logits.iter().map(|v| v - max - log_sum).collect()
}

/// The `k` best finite scores as `(token, score)`, highest first.
fn top_k(scores: &[f32], k: usize) -> Vec<(i64, f32)> {
    let mut best: Vec<(i64, f32)> = Vec::with_capacity(k + 1);
    for (token, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        if best.len() == k && best.last().map_or(false, |&(_, worst)| score <= worst) {
            continue;
        }
        let at = best.partition_point(|&(_, s)| s >= score);
        best.insert(at, (token as i64, score));
        best.truncate(k);
    }
    best
}
