use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::value::DynValue;

use crate::error::{Error, Result};

/// ONNX モデルを読み込む。失敗はすべて `path` の ModelLoad エラーとして返す
pub fn build_session(path: &Path) -> Result<Session> {
    if !path.is_file() {
        return Err(Error::model_load(path, "file not found"));
    }

    let builder = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .map_err(|e| Error::model_load(path, e))?;

    #[cfg(feature = "cuda")]
    let builder = {
        tracing::info!("[ort] Attempting CUDA execution provider...");
        builder
            .with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])
            .map_err(|e| Error::model_load(path, e))?
    };

    let session = builder
        .commit_from_file(path)
        .map_err(|e| Error::model_load(path, e))?;
    tracing::info!("Loaded ONNX model {}", path.display());
    Ok(session)
}

/// モデルを読み込み、指定した入出力テンソル名がグラフに存在するか確認する
pub fn load_session(path: &Path, input: &str, output: &str) -> Result<Session> {
    let session = build_session(path)?;
    require_tensor(path, "input", session.inputs.iter().map(|i| i.name.as_str()), input)?;
    require_tensor(path, "output", session.outputs.iter().map(|o| o.name.as_str()), output)?;
    Ok(session)
}

pub(crate) fn require_tensor<'a>(
    path: &Path,
    kind: &str,
    available: impl IntoIterator<Item = &'a str>,
    wanted: &str,
) -> Result<()> {
    let available: Vec<&str> = available.into_iter().collect();
    if available.contains(&wanted) {
        return Ok(());
    }
    Err(Error::model_load(
        path,
        format!("no {} tensor named '{}' (model has: {})", kind, wanted, available.join(", ")),
    ))
}

/// 推論結果から名前で出力を取り出す。`outputs[name]` と違い欠落時に panic しない
pub(crate) fn output<'o>(outputs: &'o SessionOutputs<'_>, name: &str) -> Result<&'o DynValue> {
    outputs
        .get(name)
        .ok_or_else(|| Error::Inference(format!("model produced no output named '{}'", name)))
}
