//! ONNX Runtime sentence embeddings for sample texts.
//!
//! Runs a sentence-transformers encoder (all-MiniLM-L6-v2 by default, 384
//! dimensions) and mean-pools token embeddings under the attention mask.
//! The model directory must contain `model.onnx` and `tokenizer.json`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use labelwise_core::{Embedding, EmbeddingService, Error, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::vector::normalize;

/// Longest token sequence fed to the encoder; longer texts are truncated.
const MAX_TOKENS: usize = 256;

/// Texts per inference call in [`OnnxEmbeddingService`].
pub const BATCH_SIZE: usize = 256;

pub struct Embedder {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
}

impl Embedder {
    /// Load an encoder from a directory containing `model.onnx` and `tokenizer.json`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        anyhow::ensure!(model_path.exists(), "model.onnx not found in {model_dir:?}");
        anyhow::ensure!(
            tokenizer_path.exists(),
            "tokenizer.json not found in {model_dir:?}"
        );

        let session = Session::builder()?
            .commit_from_file(&model_path)
            .with_context(|| format!("load {}", model_path.display()))?;
        let dim = output_dim(session.outputs()[0].dtype()).unwrap_or(384);

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams::default()));

        info!(dim, model = %model_path.display(), "loaded embedding model");
        Ok(Self {
            session,
            tokenizer,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a batch of texts, one unit-length vector per input.
    pub fn embed_batch(&mut self, texts: &[&str]) -> anyhow::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch * seq_len];
        let mut attention_mask = vec![0i64; batch * seq_len];
        let mut token_type_ids = vec![0i64; batch * seq_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let row = i * seq_len;
            let cells = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids());
            for (j, ((&id, &mask), &type_id)) in cells.enumerate() {
                input_ids[row + j] = id as i64;
                attention_mask[row + j] = mask as i64;
                token_type_ids[row + j] = type_id as i64;
            }
        }

        let shape = [batch as i64, seq_len as i64];
        let outputs = self.session.run(ort::inputs![
            "input_ids" => Tensor::from_array((shape, input_ids.into_boxed_slice()))?,
            "attention_mask" => Tensor::from_array((shape, attention_mask.clone().into_boxed_slice()))?,
            "token_type_ids" => Tensor::from_array((shape, token_type_ids.into_boxed_slice()))?,
        ])?;

        // [batch, seq_len, dim]
        let (output_shape, tokens) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = output_shape;
        anyhow::ensure!(
            dims.len() == 3
                && dims[0] as usize == batch
                && dims[1] as usize == seq_len
                && dims[2] as usize == self.dim,
            "unexpected output shape {dims:?}, expected [{batch}, {seq_len}, {}]",
            self.dim
        );

        Ok(mean_pool(tokens, &attention_mask, batch, seq_len, self.dim))
    }
}

/// Attention-masked mean over the token axis, L2-normalized.
///
/// `tokens` is `[batch, seq_len, dim]` and `mask` is `[batch, seq_len]`, both
/// row-major. Rows with an all-zero mask pool to the zero vector.
pub fn mean_pool(
    tokens: &[f32],
    mask: &[i64],
    batch: usize,
    seq_len: usize,
    dim: usize,
) -> Vec<Embedding> {
    (0..batch)
        .map(|i| {
            let mut pooled = vec![0.0f32; dim];
            let mut count = 0.0f32;
            for j in 0..seq_len {
                let weight = mask[i * seq_len + j] as f32;
                if weight <= 0.0 {
                    continue;
                }
                let offset = (i * seq_len + j) * dim;
                for (p, &t) in pooled.iter_mut().zip(&tokens[offset..offset + dim]) {
                    *p += t * weight;
                }
                count += weight;
            }
            if count > 0.0 {
                for p in &mut pooled {
                    *p /= count;
                }
            }
            normalize(&mut pooled);
            pooled
        })
        .collect()
}

fn output_dim(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .last()
            .and_then(|&d| if d > 0 { Some(d as usize) } else { None }),
        _ => None,
    }
}

/// [`EmbeddingService`] backed by a local ONNX model.
///
/// Inference needs `&mut Session`, so calls are serialized behind a mutex.
/// Large requests are split into chunks of [`BATCH_SIZE`] texts.
pub struct OnnxEmbeddingService {
    embedder: Mutex<Embedder>,
}

impl OnnxEmbeddingService {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder: Mutex::new(embedder),
        }
    }

    pub fn load(model_dir: &Path) -> Result<Self> {
        let embedder = Embedder::load(model_dir).map_err(provider_error)?;
        Ok(Self::new(embedder))
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| Error::EmbeddingProvider("embedder lock poisoned".into()))?;
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            debug!(size = chunk.len(), "embedding chunk");
            embeddings.extend(embedder.embed_batch(chunk).map_err(provider_error)?);
        }
        Ok(embeddings)
    }
}

fn provider_error(err: anyhow::Error) -> Error {
    Error::EmbeddingProvider(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{cosine_sim, l2_norm};
    use std::path::PathBuf;

    fn model_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("models")
            .join("all-MiniLM-L6-v2")
    }

    #[test]
    fn mean_pool_ignores_padding() {
        // batch 2, seq_len 3, dim 2; second row has one padded token.
        let tokens = [
            1.0, 0.0, 3.0, 0.0, 2.0, 0.0, //
            0.0, 2.0, 0.0, 4.0, 9.0, 9.0,
        ];
        let mask = [1, 1, 1, 1, 1, 0];
        let pooled = mean_pool(&tokens, &mask, 2, 3, 2);
        assert_eq!(pooled, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn mean_pool_output_is_unit_length() {
        let tokens = [3.0, 4.0, 1.0, 2.0];
        let pooled = mean_pool(&tokens, &[1, 1], 1, 2, 2);
        assert!((l2_norm(&pooled[0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mean_pool_fully_masked_row_is_zero() {
        let pooled = mean_pool(&[5.0, 5.0], &[0], 1, 1, 2);
        assert_eq!(pooled, vec![vec![0.0, 0.0]]);
    }

    #[test]
    fn load_rejects_missing_files() {
        let err = OnnxEmbeddingService::load(Path::new("/nonexistent/model")).err();
        assert!(matches!(err, Some(Error::EmbeddingProvider(_))));
    }

    #[test]
    #[ignore = "needs models/all-MiniLM-L6-v2"]
    fn embeds_across_chunks() {
        let service = OnnxEmbeddingService::load(&model_dir()).unwrap();
        let texts: Vec<String> = (0..BATCH_SIZE + 3)
            .map(|i| format!("set an alarm for {i} am"))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vecs = service.embed(&refs).unwrap();
        assert_eq!(vecs.len(), texts.len());
        for v in &vecs {
            assert_eq!(v.len(), 384);
            assert!((l2_norm(v) - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    #[ignore = "needs models/all-MiniLM-L6-v2"]
    fn related_intents_are_closer() {
        let service = OnnxEmbeddingService::load(&model_dir()).unwrap();
        let vecs = service
            .embed(&[
                "set an alarm for seven",
                "wake me up at 7 am",
                "what is the weather in paris",
            ])
            .unwrap();
        assert!(cosine_sim(&vecs[0], &vecs[1]) > cosine_sim(&vecs[0], &vecs[2]));
    }

    #[test]
    #[ignore = "needs models/all-MiniLM-L6-v2"]
    fn empty_request_skips_inference() {
        let service = OnnxEmbeddingService::load(&model_dir()).unwrap();
        assert!(service.embed(&[]).unwrap().is_empty());
    }
}
