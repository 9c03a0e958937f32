use burn::prelude::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// 境界の扱い方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingMode {
    /// 端の値を複製します（ノイマン境界に相当）
    Replicate,
    /// 領域外を 0 とします
    Zeros,
    /// 周期境界
    Circular,
}

/// 2次精度の中心差分による空間微分。
///
/// 入力は `[B, C, H, W]` のテンソルで、x 方向を W 軸、y 方向を H 軸とします。
/// 出力は入力と同じ形状です。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiniteDifference {
    pub padding: PaddingMode,
    pub dx: f32,
    pub dy: f32,
}

impl FiniteDifference {
    pub fn new(padding: PaddingMode) -> Self {
        Self {
            padding,
            dx: 1.0,
            dy: 1.0,
        }
    }

    /// 格子間隔を設定します。
    pub fn with_spacing(mut self, dx: f32, dy: f32) -> Self {
        self.dx = dx;
        self.dy = dy;
        self
    }

    fn pad_dim<B: Backend>(&self, x: Tensor<B, 4>, dim: usize) -> Tensor<B, 4> {
        let n = x.dims()[dim];
        let (before, after) = match self.padding {
            PaddingMode::Replicate => (
                x.clone().narrow(dim, 0, 1),
                x.clone().narrow(dim, n - 1, 1),
            ),
            PaddingMode::Circular => (
                x.clone().narrow(dim, n - 1, 1),
                x.clone().narrow(dim, 0, 1),
            ),
            PaddingMode::Zeros => {
                let edge = x.clone().narrow(dim, 0, 1).zeros_like();
                (edge.clone(), edge)
            }
        };
        Tensor::cat(vec![before, x, after], dim)
    }

    /// H, W 方向にそれぞれ1セルずつパディングします。
    fn pad<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pad_dim(x, 3);
        self.pad_dim(x, 2)
    }

    /// パディング済みテンソルから `(dy, dx)` だけずらした `H x W` の窓を取り出します。
    fn shifted<B: Backend>(
        padded: &Tensor<B, 4>,
        dy: usize,
        dx: usize,
        h: usize,
        w: usize,
    ) -> Tensor<B, 4> {
        padded.clone().narrow(2, dy, h).narrow(3, dx, w)
    }

    /// ∂f/∂x
    pub fn ddx<B: Backend>(&self, f: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = f.dims();
        let p = self.pad(f);
        let east = Self::shifted(&p, 1, 2, h, w);
        let west = Self::shifted(&p, 1, 0, h, w);
        (east - west).div_scalar(2.0 * self.dx)
    }

    /// ∂f/∂y
    pub fn ddy<B: Backend>(&self, f: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = f.dims();
        let p = self.pad(f);
        let south = Self::shifted(&p, 2, 1, h, w);
        let north = Self::shifted(&p, 0, 1, h, w);
        (south - north).div_scalar(2.0 * self.dy)
    }

    /// `(∂f/∂x, ∂f/∂y)`
    pub fn gradient<B: Backend>(&self, f: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        (self.ddx(f.clone()), self.ddy(f))
    }

    /// 5点ステンシルによるラプラシアン ∇²f
    pub fn laplacian<B: Backend>(&self, f: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = f.dims();
        let p = self.pad(f.clone());
        let center2 = f.mul_scalar(2.0);
        let d2x = (Self::shifted(&p, 1, 2, h, w) + Self::shifted(&p, 1, 0, h, w) - center2.clone())
            .div_scalar(self.dx * self.dx);
        let d2y = (Self::shifted(&p, 2, 1, h, w) + Self::shifted(&p, 0, 1, h, w) - center2)
            .div_scalar(self.dy * self.dy);
        d2x + d2y
    }

    /// ∇·(u, v)
    pub fn divergence<B: Backend>(&self, u: Tensor<B, 4>, v: Tensor<B, 4>) -> Tensor<B, 4> {
        self.ddx(u) + self.ddy(v)
    }

    /// 移流項 `u ∂f/∂x + v ∂f/∂y`
    pub fn advection<B: Backend>(
        &self,
        f: Tensor<B, 4>,
        u: Tensor<B, 4>,
        v: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let (fx, fy) = self.gradient(f);
        u * fx + v * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    /// `f(i, j)` で値を与えた `[1, 1, h, w]` の場
    fn field(h: usize, w: usize, f: impl Fn(usize, usize) -> f32) -> Tensor<TestBackend, 4> {
        let values = (0..h)
            .flat_map(|i| (0..w).map(move |j| (i, j)))
            .map(|(i, j)| f(i, j))
            .collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(values, [1, 1, h, w]), &Default::default())
    }

    fn values(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn ddx_of_linear_field_is_constant_in_the_interior() {
        let fd = FiniteDifference::new(PaddingMode::Replicate).with_spacing(0.5, 1.0);
        let out = values(fd.ddx(field(3, 4, |_, j| j as f32)));
        // 内部: (f(j+1) - f(j-1)) / (2 * 0.5) = 2
        assert_relative_eq!(out[1], 2.0);
        assert_relative_eq!(out[2], 2.0);
        // 端: 複製境界で片側だけの差分になる
        assert_relative_eq!(out[0], 1.0);
        assert_relative_eq!(out[3], 1.0);
    }

    #[test]
    fn ddy_follows_the_row_axis() {
        let fd = FiniteDifference::new(PaddingMode::Zeros);
        let out = values(fd.ddy(field(3, 2, |i, _| 3.0 * i as f32)));
        // 行1（内部）の両列
        assert_relative_eq!(out[2], 3.0);
        assert_relative_eq!(out[3], 3.0);
    }

    #[test]
    fn laplacian_of_quadratic_is_two() {
        let fd = FiniteDifference::new(PaddingMode::Replicate);
        let out = values(fd.laplacian(field(3, 5, |_, j| (j * j) as f32)));
        for j in 1..4 {
            assert_relative_eq!(out[5 + j], 2.0);
        }
    }

    #[test]
    fn circular_padding_wraps_around() {
        let fd = FiniteDifference::new(PaddingMode::Circular);
        let constant = values(fd.laplacian(field(4, 4, |_, _| 1.5)));
        assert!(constant.iter().all(|v| v.abs() < 1e-6));

        let out = values(fd.ddx(field(1, 4, |_, j| j as f32)));
        // j=0: (f(1) - f(3)) / 2 = -1
        assert_relative_eq!(out[0], -1.0);
    }

    #[test]
    fn divergence_of_rotation_vanishes() {
        let fd = FiniteDifference::new(PaddingMode::Replicate);
        // (u, v) = (-y, x) は発散ゼロ
        let u = field(4, 4, |i, _| -(i as f32));
        let v = field(4, 4, |_, j| j as f32);
        let div = values(fd.divergence(u, v));
        assert!(div.iter().all(|d| d.abs() < 1e-6));
    }
}
