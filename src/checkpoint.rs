use crate::error::{ParcError, Result};
use crate::model::Parcv2;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use std::path::{Path, PathBuf};

/// 重みファイルの拡張子（レコーダーが自動で付与します）。
pub const CHECKPOINT_EXTENSION: &str = "mpk";

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// 拡張子付きの実際のファイルパスを返します。
pub fn checkpoint_file(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().with_extension(CHECKPOINT_EXTENSION)
}

/// モデルの重みを保存します。`path` の拡張子は `.mpk` に置き換えられます。
pub fn save_weights<B: Backend>(model: &Parcv2<B>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = checkpoint_file(path);
    model.clone().save_file(path.clone(), &recorder())?;
    log::info!("モデルを '{}' に保存しました", path.display());
    Ok(path)
}

/// 保存済みの重みを `model` に読み込みます。
///
/// `model` は同じ設定で初期化されている必要があります。
pub fn load_weights<B: Backend>(
    model: Parcv2<B>,
    path: impl AsRef<Path>,
    device: &B::Device,
) -> Result<Parcv2<B>> {
    let path = checkpoint_file(path);
    if !path.exists() {
        return Err(ParcError::io(
            &path,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "checkpoint not found; run the 'train' command first",
            ),
        ));
    }
    log::info!("保存済みモデルを '{}' からロード中...", path.display());
    Ok(model.load_file(path, &recorder(), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::small_config;
    use crate::normalization::tests::temp_dir;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor};

    type TestBackend = NdArray<f32>;

    #[test]
    fn saved_weights_reproduce_predictions() {
        let device = Default::default();
        let dir = temp_dir("checkpoint");
        let config = small_config();
        let model = config.init::<TestBackend>(&device).unwrap();
        let saved = save_weights(&model, dir.join("model")).unwrap();
        assert!(saved.exists());

        let fresh = config.init::<TestBackend>(&device).unwrap();
        let loaded = load_weights(fresh, dir.join("model"), &device).unwrap();

        let ic = Tensor::<TestBackend, 4>::random([1, 4, 8, 8], Distribution::Default, &device);
        let a = model.forward(ic.clone(), 0.0, &[1.0]).unwrap();
        let b = loaded.forward(ic, 0.0, &[1.0]).unwrap();
        let diff = (a - b).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let err = load_weights(model, temp_dir("checkpoint-missing").join("none"), &device);
        assert!(matches!(err, Err(ParcError::Io { .. })));
    }
}
