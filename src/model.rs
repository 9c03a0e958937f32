//! PARCv2 モデル本体と損失関数。

use crate::dataset::PhysicsBatch;
use crate::differentiator::{AdrDifferentiator, AdrDifferentiatorConfig};
use crate::error::ParcError;
use crate::integrator::{Integrator, IntegratorConfig, OdeMethod, check_times};
use crate::poisson::PoissonBlockConfig;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Navier-Stokes データのチャンネル名。
pub const NAVIER_STOKES_CHANNELS: [&str; 4] = ["pressure", "Re", "u", "v"];

/// 損失関数の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// 平均絶対誤差
    L1,
    /// 平均二乗誤差
    Mse,
}

impl LossKind {
    pub fn compute<B: Backend, const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        match self {
            Self::L1 => (prediction - target).abs().mean(),
            Self::Mse => MseLoss::new().forward(prediction, target, Reduction::Mean),
        }
    }
}

/// PARCv2 モデルの設定。
#[derive(Config, Debug)]
pub struct Parcv2Config {
    pub differentiator: AdrDifferentiatorConfig,
    pub integrator: IntegratorConfig,
    #[config(default = "LossKind::L1")]
    pub loss: LossKind,
}

impl Parcv2Config {
    /// 圧力・レイノルズ数・u・v の4チャンネルを持つ Navier-Stokes 用の構成。
    ///
    /// 速度場に移流・拡散項を与え、圧力は Poisson ブロックで、レイノルズ数は定数として扱います。
    pub fn navier_stokes() -> Self {
        let differentiator = AdrDifferentiatorConfig::new(4, vec![2, 3], vec![2, 3])
            .with_velocity_indices([2, 3]);
        let integrator = IntegratorConfig::new()
            .with_method(OdeMethod::Heun)
            .with_poisson(Some(
                PoissonBlockConfig::new()
                    .with_pressure_index(0)
                    .with_velocity_indices([2, 3]),
            ));
        Self::new(differentiator, integrator)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.differentiator.validate()?;
        self.integrator.validate(self.differentiator.n_channels)
    }

    /// 設定を検査してからモデルを初期化します。
    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::Result<Parcv2<B>> {
        self.validate()?;
        Ok(Parcv2 {
            differentiator: self.differentiator.init(device),
            integrator: self.integrator.init(device),
            loss: Ignored(self.loss),
        })
    }
}

/// 微分器と積分器を組み合わせた物理情報付き再帰畳み込みモデル。
#[derive(Module, Debug)]
pub struct Parcv2<B: Backend> {
    differentiator: AdrDifferentiator<B>,
    integrator: Integrator<B>,
    loss: Ignored<LossKind>,
}

impl<B: Backend> Parcv2<B> {
    /// 初期条件 `[B, C, H, W]` から時刻 `t1` の状態 `[T, B, C, H, W]` を予測します。
    pub fn forward(&self, ic: Tensor<B, 4>, t0: f32, t1: &[f32]) -> crate::Result<Tensor<B, 5>> {
        check_times(t0, t1)?;
        self.differentiator.check_input(ic.dims())?;
        Ok(self.integrator.rollout(&self.differentiator, ic, t0, t1))
    }

    /// 設定された損失関数で予測と正解を比較します。
    pub fn loss(
        &self,
        prediction: Tensor<B, 5>,
        target: Tensor<B, 5>,
    ) -> crate::Result<Tensor<B, 1>> {
        if prediction.dims() != target.dims() {
            return Err(ParcError::Shape(format!(
                "prediction {:?} vs target {:?}",
                prediction.dims(),
                target.dims()
            )));
        }
        Ok(self.loss.0.compute(prediction, target))
    }

    /// バッチに対する予測と損失を計算します。
    pub fn forward_batch(
        &self,
        batch: &PhysicsBatch<B>,
    ) -> crate::Result<(Tensor<B, 5>, Tensor<B, 1>)> {
        let prediction = self.forward(batch.ic.clone(), batch.t0, &batch.t1)?;
        let loss = self.loss(prediction.clone(), batch.target.clone())?;
        Ok((prediction, loss))
    }

    pub fn differentiator(&self) -> &AdrDifferentiator<B> {
        &self.differentiator
    }

    pub fn integrator(&self) -> &Integrator<B> {
        &self.integrator
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    /// テスト用の小さな Navier-Stokes 構成
    pub(crate) fn small_config() -> Parcv2Config {
        let mut config = Parcv2Config::navier_stokes();
        config.differentiator = config
            .differentiator
            .with_n_fe_features(4)
            .with_unet_filters(vec![4, 8])
            .with_mapping_hidden(4);
        config.integrator.poisson = config.integrator.poisson.map(|p| p.with_hidden(4));
        config
    }

    #[test]
    fn rollout_has_time_major_shape() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let ic = Tensor::<TestBackend, 4>::random([2, 4, 8, 8], Distribution::Default, &device);

        let prediction = model.forward(ic.clone(), 0.0, &[0.5, 1.0, 1.5]).unwrap();
        assert_eq!(prediction.dims(), [3, 2, 4, 8, 8]);

        // レイノルズ数チャンネルは時間発展しない
        let re_ic = ic.narrow(1, 1, 1);
        let re_last = prediction.narrow(0, 2, 1).reshape([2, 4, 8, 8]).narrow(1, 1, 1);
        let drift = (re_last - re_ic).abs().max().into_scalar();
        assert!(drift < 1e-6);
    }

    #[test]
    fn forward_rejects_bad_inputs() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let ic = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);
        assert!(matches!(
            model.forward(ic.clone(), 1.0, &[0.5]),
            Err(ParcError::InvalidTime(_))
        ));
        let wrong = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);
        assert!(matches!(model.forward(wrong, 0.0, &[1.0]), Err(ParcError::Shape(_))));
    }

    #[test]
    fn l1_and_mse_losses() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]),
            &device,
        );
        let b = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        assert_relative_eq!(LossKind::L1.compute(a.clone(), b.clone()).into_scalar(), 2.5);
        assert_relative_eq!(LossKind::Mse.compute(a, b).into_scalar(), 7.5);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = Parcv2Config::navier_stokes();
        let path = std::env::temp_dir().join(format!("parc-config-{}.json", std::process::id()));
        config.save(&path).unwrap();
        let loaded = Parcv2Config::load(&path).unwrap();
        assert_eq!(loaded.differentiator.advection_indices, vec![2, 3]);
        assert_eq!(loaded.integrator.method, OdeMethod::Heun);
        assert_eq!(loaded.integrator.poisson.map(|p| p.pressure_index), Some(0));
        assert_eq!(loaded.loss, LossKind::L1);
    }
}
