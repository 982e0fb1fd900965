use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::{debug, info};

use super::generation::{self, GenerationParams};
use super::interface::{LoadError, TranslateError, Translator};
use super::Language;

const ENCODER_FILE: &str = "encoder_model.onnx";
const DECODER_FILE: &str = "decoder_model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Knobs shared by every model the registry loads
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub max_sequence_length: usize,
    pub intra_threads: Option<usize>,
}

/// Marian encoder-decoder exported to ONNX, one per target language.
///
/// `Session::run` needs exclusive access, so each session sits behind a
/// mutex and inference runs on the blocking pool.
pub struct MarianTranslator {
    model: Arc<MarianModel>,
}

struct MarianModel {
    language: Language,
    tokenizer: Tokenizer,
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    params: GenerationParams,
}

struct EncoderOutput {
    hidden_states: Vec<f32>,
    hidden_size: usize,
    attention_mask: Vec<i64>,
}

impl MarianTranslator {
    /// Load `encoder_model.onnx`, `decoder_model.onnx`, `tokenizer.json`
    /// and the generation settings from `model_dir`.
    pub fn load(language: Language, model_dir: &Path, options: EngineOptions) -> Result<Self, LoadError> {
        info!("Loading {} model from {}", language, model_dir.display());

        let encoder_path = require_file(model_dir, ENCODER_FILE)?;
        let decoder_path = require_file(model_dir, DECODER_FILE)?;
        let tokenizer_path = require_file(model_dir, TOKENIZER_FILE)?;

        let tokenizer = load_tokenizer(&tokenizer_path, options.max_sequence_length)?;
        let params = GenerationParams::from_model_dir(model_dir, options.max_sequence_length)?;
        let encoder = load_session(&encoder_path, options.intra_threads)?;
        let decoder = load_session(&decoder_path, options.intra_threads)?;

        debug!(
            "{} generation settings: beams={}, max_length={}, eos={}, start={}",
            language, params.num_beams, params.max_length, params.eos_token_id, params.decoder_start_token_id
        );

        Ok(Self {
            model: Arc::new(MarianModel {
                language,
                tokenizer,
                encoder: Mutex::new(encoder),
                decoder: Mutex::new(decoder),
                params,
            }),
        })
    }
}

#[async_trait]
impl Translator for MarianTranslator {
    async fn translate(&self, text: &str) -> Result<Vec<String>, TranslateError> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || model.translate(&text)).await?
    }
}

impl MarianModel {
    fn translate(&self, text: &str) -> Result<Vec<String>, TranslateError> {
        let input_ids = self.encode(text)?;
        let encoded = self.run_encoder(&input_ids)?;

        let mut decoder = self.decoder.lock().map_err(|_| TranslateError::Poisoned)?;
        let hypotheses = generation::generate(&self.params, |prefix| {
            next_token_logits(&mut decoder, &encoded, prefix)
        })?;
        drop(decoder);

        debug!(
            "{} produced {} candidate(s) for {} input tokens",
            self.language,
            hypotheses.len(),
            input_ids.len()
        );

        hypotheses
            .iter()
            .map(|hyp| {
                let ids: Vec<u32> = hyp.tokens.iter().map(|&id| id as u32).collect();
                self.tokenizer
                    .decode(&ids, true)
                    .map_err(|e| TranslateError::Decode(e.to_string()))
            })
            .collect()
    }

    fn encode(&self, text: &str) -> Result<Vec<i64>, TranslateError> {
        encode_source(&self.tokenizer, self.params.eos_token_id, text)
    }

    fn run_encoder(&self, input_ids: &[i64]) -> Result<EncoderOutput, TranslateError> {
        let seq_len = input_ids.len();
        let attention_mask = vec![1i64; seq_len];

        let mut encoder = self.encoder.lock().map_err(|_| TranslateError::Poisoned)?;
        let outputs = encoder.run(ort::inputs![
            "input_ids" => Tensor::from_array(([1usize, seq_len], input_ids.to_vec()))?,
            "attention_mask" => Tensor::from_array(([1usize, seq_len], attention_mask.clone()))?,
        ])?;

        let (shape, data) = outputs["last_hidden_state"].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let hidden_size = match dims.as_slice() {
            [1, len, hidden] if *len == seq_len => *hidden,
            other => {
                return Err(TranslateError::Output(format!(
                    "encoder hidden states have shape {other:?}, expected [1, {seq_len}, hidden]"
                )))
            }
        };

        Ok(EncoderOutput {
            hidden_states: data.to_vec(),
            hidden_size,
            attention_mask,
        })
    }
}

/// Source ids for the encoder, always terminated by `eos`.
fn encode_source(tokenizer: &Tokenizer, eos: i64, text: &str) -> Result<Vec<i64>, TranslateError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| TranslateError::Tokenization(e.to_string()))?;

    let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    if input_ids.is_empty() {
        return Err(TranslateError::Tokenization("input encoded to zero tokens".to_string()));
    }

    // Truncation can cut off the EOS the tokenizer appended.
    if input_ids.last() != Some(&eos) {
        let max_tokens = tokenizer
            .get_truncation()
            .map(|t| t.max_length)
            .unwrap_or(usize::MAX);
        if input_ids.len() >= max_tokens {
            input_ids.pop();
        }
        input_ids.push(eos);
    }
    Ok(input_ids)
}

/// One decoder pass over the whole prefix; returns logits of the last position.
fn next_token_logits(
    decoder: &mut Session,
    encoded: &EncoderOutput,
    prefix: &[i64],
) -> Result<Vec<f32>, TranslateError> {
    let src_len = encoded.attention_mask.len();
    let dec_len = prefix.len();

    let outputs = decoder.run(ort::inputs![
        "encoder_attention_mask" => Tensor::from_array(([1usize, src_len], encoded.attention_mask.clone()))?,
        "input_ids" => Tensor::from_array(([1usize, dec_len], prefix.to_vec()))?,
        "encoder_hidden_states" => Tensor::from_array((
            [1usize, src_len, encoded.hidden_size],
            encoded.hidden_states.clone(),
        ))?,
    ])?;

    let (shape, data) = outputs["logits"].try_extract_tensor::<f32>()?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    match dims.as_slice() {
        [1, len, vocab] if *len == dec_len && *vocab > 0 => {
            let start = (dec_len - 1) * vocab;
            Ok(data[start..start + vocab].to_vec())
        }
        other => Err(TranslateError::Output(format!(
            "decoder logits have shape {other:?}, expected [1, {dec_len}, vocab]"
        ))),
    }
}

fn require_file(dir: &Path, name: &str) -> Result<PathBuf, LoadError> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(LoadError::MissingFile(path))
    }
}

fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer, LoadError> {
    let tokenizer_error = |message: String| LoadError::Tokenizer {
        path: path.to_path_buf(),
        message,
    };

    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| tokenizer_error(e.to_string()))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..TruncationParams::default()
        }))
        .map_err(|e| tokenizer_error(e.to_string()))?;
    tokenizer.with_padding(Some(PaddingParams::default()));
    Ok(tokenizer)
}

fn load_session(path: &Path, intra_threads: Option<usize>) -> Result<Session, LoadError> {
    let session_error = |e: &dyn std::fmt::Display| LoadError::Session {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut builder = Session::builder()
        .map_err(|e| session_error(&e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| session_error(&e))?;
    if let Some(threads) = intra_threads {
        builder = builder.with_intra_threads(threads).map_err(|e| session_error(&e))?;
    }
    builder.commit_from_file(path).map_err(|e| session_error(&e))
}
