//! 時間積分。
//!
//! 微分器が返す時間微分を陽的な ODE ソルバーで積分し、初期条件から
//! 予測対象の各時刻まで状態を進めます。

use crate::differentiator::AdrDifferentiator;
use crate::error::ParcError;
use crate::poisson::{PoissonBlock, PoissonBlockConfig};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// 陽的 ODE ソルバーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdeMethod {
    /// 前進オイラー法（1次）
    Euler,
    /// ホイン法（2次）
    Heun,
    /// 古典的ルンゲ＝クッタ法（4次）
    Rk4,
}

impl OdeMethod {
    /// `y` を `dt` だけ進めます。`f` は時間微分を返す関数です。
    pub fn step<B: Backend, F>(&self, f: F, y: Tensor<B, 4>, dt: f32) -> Tensor<B, 4>
    where
        F: Fn(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        match self {
            Self::Euler => {
                let k1 = f(y.clone());
                y + k1.mul_scalar(dt)
            }
            Self::Heun => {
                let k1 = f(y.clone());
                let k2 = f(y.clone() + k1.clone().mul_scalar(dt));
                y + (k1 + k2).mul_scalar(dt / 2.0)
            }
            Self::Rk4 => {
                let k1 = f(y.clone());
                let k2 = f(y.clone() + k1.clone().mul_scalar(dt / 2.0));
                let k3 = f(y.clone() + k2.clone().mul_scalar(dt / 2.0));
                let k4 = f(y.clone() + k3.clone().mul_scalar(dt));
                let sum = k1 + k2.mul_scalar(2.0) + k3.mul_scalar(2.0) + k4;
                y + sum.mul_scalar(dt / 6.0)
            }
        }
    }
}

/// 積分器の設定。
#[derive(Config, Debug)]
pub struct IntegratorConfig {
    #[config(default = "OdeMethod::Heun")]
    pub method: OdeMethod,
    /// 1つの予測区間を何回に分けて積分するか
    #[config(default = 1)]
    pub substeps: usize,
    /// 各ステップ後に状態を `[0, 1]` に収めるか
    #[config(default = false)]
    pub clip: bool,
    /// 設定すると各ステップ後に圧力を Poisson ブロックで置き換えます
    #[config(default = "None")]
    pub poisson: Option<PoissonBlockConfig>,
}

#[derive(Debug, Clone, Copy)]
pub struct StepSettings {
    pub method: OdeMethod,
    pub substeps: usize,
    pub clip: bool,
}

/// 時間積分器。
#[derive(Module, Debug)]
pub struct Integrator<B: Backend> {
    poisson: Option<PoissonBlock<B>>,
    settings: Ignored<StepSettings>,
}

impl IntegratorConfig {
    pub fn validate(&self, n_channels: usize) -> crate::Result<()> {
        if self.substeps == 0 {
            return Err(ParcError::Config("substeps must be at least 1".into()));
        }
        if let Some(poisson) = &self.poisson {
            poisson.validate(n_channels)?;
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Integrator<B> {
        Integrator {
            poisson: self.poisson.as_ref().map(|p| p.init(device)),
            settings: Ignored(StepSettings {
                method: self.method,
                substeps: self.substeps,
                clip: self.clip,
            }),
        }
    }
}

/// `t0 < t1[0] < t1[1] < ...` を満たすか検査します。
pub fn check_times(t0: f32, t1: &[f32]) -> crate::Result<()> {
    if t1.is_empty() {
        return Err(ParcError::InvalidTime("no target times".into()));
    }
    let mut prev = t0;
    for &t in t1 {
        if !(t > prev) {
            return Err(ParcError::InvalidTime(format!(
                "times must be strictly increasing, got {t} after {prev}"
            )));
        }
        prev = t;
    }
    Ok(())
}

impl<B: Backend> Integrator<B> {
    pub fn settings(&self) -> StepSettings {
        self.settings.0
    }

    /// 初期条件 `ic` から各時刻 `t1` の状態を予測し、`[T, B, C, H, W]` で返します。
    ///
    /// 時刻列は [`check_times`] で検査済みであることを前提とします。
    pub fn rollout(
        &self,
        differentiator: &AdrDifferentiator<B>,
        ic: Tensor<B, 4>,
        t0: f32,
        t1: &[f32],
    ) -> Tensor<B, 5> {
        let settings = self.settings.0;
        let rate = |state: Tensor<B, 4>| differentiator.forward(state);

        let mut state = ic;
        let mut t = t0;
        let mut outputs = Vec::with_capacity(t1.len());
        for &t_next in t1 {
            let dt = (t_next - t) / settings.substeps as f32;
            for _ in 0..settings.substeps {
                state = settings.method.step(&rate, state, dt);
                if let Some(poisson) = &self.poisson {
                    state = poisson.apply(state);
                }
                if settings.clip {
                    state = state.clamp(0.0, 1.0);
                }
            }
            outputs.push(state.clone());
            t = t_next;
        }
        Tensor::stack(outputs, 0)
    }
}
