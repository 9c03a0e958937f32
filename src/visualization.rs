//! 予測結果と正解の比較アニメーション、および損失グラフの描画。

use crate::error::{ParcError, Result};
use burn::prelude::Backend;
use burn::tensor::Tensor;
use ndarray::{Array4, ArrayView2, ArrayView4, Axis};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

/// 1パネルの大きさ（ピクセル）
const PANEL_SIZE: u32 = 320;

fn plot_err(e: impl std::fmt::Display) -> ParcError {
    ParcError::Plot(e.to_string())
}

/// `[T, C, H, W]` のテンソルを ndarray に変換します。
pub fn tensor_to_array<B: Backend>(tensor: Tensor<B, 4>) -> Result<Array4<f32>> {
    let [t, c, h, w] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ParcError::Tensor(format!("{e:?}")))?;
    Array4::from_shape_vec((t, c, h, w), values).map_err(|e| ParcError::Shape(e.to_string()))
}

/// 値 `v` を `[lo, hi]` で正規化し、青から赤へのカラーマップで色を返します。
fn colormap(v: f32, lo: f32, hi: f32) -> HSLColor {
    let x = if hi > lo { ((v - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.5 };
    HSLColor(0.667 * (1.0 - x as f64), 1.0, 0.5)
}

fn value_range<'a>(values: impl Iterator<Item = &'a f32>) -> (f32, f32) {
    values.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

/// 1フレーム分のヒートマップを描画します。行0が上になるように描きます。
fn draw_heatmap<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    title: &str,
    frame: ArrayView2<f32>,
    lo: f32,
    hi: f32,
) -> Result<()> {
    let (h, w) = frame.dim();
    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18).into_font())
        .margin(5)
        .build_cartesian_2d(0..w as i32, 0..h as i32)
        .map_err(plot_err)?;
    chart
        .draw_series(frame.indexed_iter().map(|((i, j), &v)| {
            let (x, y) = (j as i32, (h - 1 - i) as i32);
            Rectangle::new([(x, y), (x + 1, y + 1)], colormap(v, lo, hi).filled())
        }))
        .map_err(plot_err)?;
    Ok(())
}

/// 予測・正解・絶対誤差を横に並べた GIF アニメーションを保存します。
///
/// `prediction` と `target` は `[T, C, H, W]` で、チャンネル `channel` の全時刻を1フレームずつ描画します。
/// 予測と正解は同じカラーレンジを共有します。
pub fn save_comparison_gif(
    prediction: ArrayView4<f32>,
    target: ArrayView4<f32>,
    channel: usize,
    channel_name: &str,
    path: impl AsRef<Path>,
    frame_delay_ms: u32,
) -> Result<()> {
    if prediction.dim() != target.dim() {
        return Err(ParcError::Shape(format!(
            "prediction {:?} vs target {:?}",
            prediction.dim(),
            target.dim()
        )));
    }
    let (steps, channels, _, _) = prediction.dim();
    if channel >= channels {
        return Err(ParcError::Shape(format!(
            "channel {channel} out of range for {channels} channels"
        )));
    }

    let pred = prediction.index_axis(Axis(1), channel);
    let truth = target.index_axis(Axis(1), channel);
    let error = (&pred - &truth).mapv(f32::abs);
    let (lo, hi) = value_range(pred.iter().chain(truth.iter()));
    let (_, err_hi) = value_range(error.iter());

    let path = path.as_ref();
    let root = BitMapBackend::gif(path, (3 * PANEL_SIZE, PANEL_SIZE), frame_delay_ms)
        .map_err(plot_err)?
        .into_drawing_area();

    for t in 0..steps {
        root.fill(&WHITE).map_err(plot_err)?;
        let panels = root.split_evenly((1, 3));
        let frames = [
            (
                format!("{channel_name} predicted (t={})", t + 1),
                pred.index_axis(Axis(0), t),
                lo,
                hi,
            ),
            (format!("{channel_name} ground truth"), truth.index_axis(Axis(0), t), lo, hi),
            ("absolute error".to_string(), error.index_axis(Axis(0), t), 0.0, err_hi),
        ];
        for (panel, (title, frame, lo, hi)) in panels.iter().zip(frames) {
            draw_heatmap(panel, &title, frame, lo, hi)?;
        }
        root.present().map_err(plot_err)?;
    }
    log::info!(
        "'{}' の比較アニメーション ({} フレーム) を '{}' に保存しました",
        channel_name,
        steps,
        path.display()
    );
    Ok(())
}

/// `(エポック, log10(損失))` の系列。正でない損失は対数が取れないため除きます。
fn log_series(history: &[f32]) -> Vec<(usize, f32)> {
    history
        .iter()
        .enumerate()
        .filter(|(_, val)| **val > 0.0)
        .map(|(i, val)| (i + 1, val.log10()))
        .collect()
}

/// 学習過程の損失をグラフとして PNG ファイルに出力します。
pub fn plot_loss_history(
    train_loss_hist: &[f32],
    valid_loss_hist: Option<&[f32]>,
    path: impl AsRef<Path>,
) -> Result<()> {
    if train_loss_hist.is_empty() {
        return Ok(());
    }
    let log_values = train_loss_hist
        .iter()
        .chain(valid_loss_hist.unwrap_or(&[]))
        .filter(|v| **v > 0.0)
        .map(|v| v.log10())
        .collect::<Vec<_>>();
    let (min_log_loss, max_log_loss) = value_range(log_values.iter());
    let (min_log_loss, max_log_loss) = if min_log_loss.is_finite() {
        (min_log_loss - 0.5, max_log_loss + 0.1)
    } else {
        (-6.0, 0.0)
    };

    let root = BitMapBackend::new(path.as_ref(), (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(1..train_loss_hist.len() + 1, min_log_loss..max_log_loss)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epoch")
        .draw()
        .map_err(plot_err)?;
    chart
        .draw_series(LineSeries::new(
            log_series(train_loss_hist),
            &RED,
        ))
        .map_err(plot_err)?
        .label("Train Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    if let Some(valid) = valid_loss_hist {
        chart
            .draw_series(LineSeries::new(
                log_series(valid),
                &BLUE,
            ))
            .map_err(plot_err)?
            .label("Validation Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}
