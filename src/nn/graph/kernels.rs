/*
 * @Description  : 计算图各算子的数值内核（前向与向量-雅可比积），直接在行优先切片上计算
 *
 * 约定：特征图为`[N, C, H, W]`，全连接输入为`[N, features]`，权重为`[out, in]`。
 */

use crate::errors::NasError;
use crate::tensor::Tensor;

fn dims4(t: &Tensor, op: &str) -> Result<(usize, usize, usize, usize), NasError> {
    match t.shape() {
        &[n, c, h, w] => Ok((n, c, h, w)),
        other => Err(NasError::Computation(format!(
            "{op}要求输入为[N, C, H, W]，但得到{other:?}"
        ))),
    }
}

fn dims2(t: &Tensor, op: &str) -> Result<(usize, usize), NasError> {
    match t.shape() {
        &[rows, cols] => Ok((rows, cols)),
        other => Err(NasError::Computation(format!(
            "{op}要求输入为2阶张量，但得到{other:?}"
        ))),
    }
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓1x1卷积↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// y[n,o,s] = Σ_c W[o,c] · x[n,c,s]
pub(super) fn conv1x1_forward(x: &Tensor, weight: &Tensor) -> Result<Tensor, NasError> {
    let (n, c_in, h, w) = dims4(x, "1x1卷积")?;
    let (c_out, w_in) = dims2(weight, "1x1卷积权重")?;
    if w_in != c_in {
        return Err(NasError::Computation(format!(
            "1x1卷积的输入通道数{c_in}与权重形状{:?}不匹配",
            weight.shape()
        )));
    }
    let hw = h * w;
    let (xs, ws) = (x.data_as_slice(), weight.data_as_slice());
    let mut out = vec![0.; n * c_out * hw];
    for b in 0..n {
        for o in 0..c_out {
            let dst = &mut out[(b * c_out + o) * hw..(b * c_out + o + 1) * hw];
            for c in 0..c_in {
                let k = ws[o * c_in + c];
                let src = &xs[(b * c_in + c) * hw..(b * c_in + c + 1) * hw];
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += k * s;
                }
            }
        }
    }
    Ok(Tensor::from_vec(out, &[n, c_out, h, w]))
}

/// 返回`(dx, dW)`
pub(super) fn conv1x1_backward(x: &Tensor, weight: &Tensor, dy: &Tensor) -> (Tensor, Tensor) {
    let (n, c_in, h, w) = (x.shape()[0], x.shape()[1], x.shape()[2], x.shape()[3]);
    let c_out = weight.shape()[0];
    let hw = h * w;
    let (xs, ws, dys) = (x.data_as_slice(), weight.data_as_slice(), dy.data_as_slice());
    let mut dx = vec![0.; xs.len()];
    let mut dw = vec![0.; ws.len()];
    for b in 0..n {
        for o in 0..c_out {
            let g = &dys[(b * c_out + o) * hw..(b * c_out + o + 1) * hw];
            for c in 0..c_in {
                let k = ws[o * c_in + c];
                let x_range = (b * c_in + c) * hw..(b * c_in + c + 1) * hw;
                let mut acc = 0.;
                for ((d, s), gv) in dx[x_range.clone()].iter_mut().zip(&xs[x_range]).zip(g) {
                    *d += k * gv;
                    acc += gv * s;
                }
                dw[o * c_in + c] += acc;
            }
        }
    }
    (
        Tensor::from_vec(dx, x.shape()),
        Tensor::from_vec(dw, weight.shape()),
    )
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑1x1卷积↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓批归一化↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 每个通道的均值与有偏方差
pub(super) fn channel_stats(x: &Tensor) -> Result<(Vec<f32>, Vec<f32>), NasError> {
    let (n, c, h, w) = dims4(x, "批归一化")?;
    let hw = h * w;
    let m = (n * hw).max(1) as f32;
    let xs = x.data_as_slice();
    let mut mean = vec![0.; c];
    let mut var = vec![0.; c];
    for ch in 0..c {
        let mut sum = 0.;
        for b in 0..n {
            sum += xs[(b * c + ch) * hw..(b * c + ch + 1) * hw].iter().sum::<f32>();
        }
        mean[ch] = sum / m;
        let mut sq = 0.;
        for b in 0..n {
            sq += xs[(b * c + ch) * hw..(b * c + ch + 1) * hw]
                .iter()
                .map(|v| (v - mean[ch]).powi(2))
                .sum::<f32>();
        }
        var[ch] = sq / m;
    }
    Ok((mean, var))
}

/// 返回`(y, x_hat)`：x_hat = (x - mean) · inv_std，y = γ · x_hat + β
pub(super) fn batch_norm_forward(
    x: &Tensor,
    mean: &[f32],
    inv_std: &[f32],
    gamma: Option<&Tensor>,
    beta: Option<&Tensor>,
) -> Result<(Tensor, Tensor), NasError> {
    let (n, c, h, w) = dims4(x, "批归一化")?;
    let hw = h * w;
    let xs = x.data_as_slice();
    let mut x_hat = vec![0.; xs.len()];
    let mut y = vec![0.; xs.len()];
    for b in 0..n {
        for ch in 0..c {
            let g = gamma.map_or(1., |t| t.data_as_slice()[ch]);
            let bt = beta.map_or(0., |t| t.data_as_slice()[ch]);
            let range = (b * c + ch) * hw..(b * c + ch + 1) * hw;
            for i in range {
                x_hat[i] = (xs[i] - mean[ch]) * inv_std[ch];
                y[i] = g * x_hat[i] + bt;
            }
        }
    }
    Ok((
        Tensor::from_vec(y, x.shape()),
        Tensor::from_vec(x_hat, x.shape()),
    ))
}

/// 返回`(dx, dγ, dβ)`；`batch_stats`表示前向时用的是批统计量（训练模式）
pub(super) fn batch_norm_backward(
    dy: &Tensor,
    x_hat: &Tensor,
    inv_std: &[f32],
    gamma: Option<&Tensor>,
    batch_stats: bool,
) -> (Tensor, Vec<f32>, Vec<f32>) {
    let (n, c, h, w) = (dy.shape()[0], dy.shape()[1], dy.shape()[2], dy.shape()[3]);
    let hw = h * w;
    let m = (n * hw).max(1) as f32;
    let (dys, xh) = (dy.data_as_slice(), x_hat.data_as_slice());
    let mut dx = vec![0.; dys.len()];
    let mut d_gamma = vec![0.; c];
    let mut d_beta = vec![0.; c];
    for ch in 0..c {
        let g = gamma.map_or(1., |t| t.data_as_slice()[ch]);
        let mut sum_dxh = 0.;
        let mut sum_dxh_xh = 0.;
        for b in 0..n {
            for i in (b * c + ch) * hw..(b * c + ch + 1) * hw {
                d_gamma[ch] += dys[i] * xh[i];
                d_beta[ch] += dys[i];
                let dxh = dys[i] * g;
                sum_dxh += dxh;
                sum_dxh_xh += dxh * xh[i];
            }
        }
        for b in 0..n {
            for i in (b * c + ch) * hw..(b * c + ch + 1) * hw {
                let dxh = dys[i] * g;
                dx[i] = if batch_stats {
                    inv_std[ch] / m * (m * dxh - sum_dxh - xh[i] * sum_dxh_xh)
                } else {
                    dxh * inv_std[ch]
                };
            }
        }
    }
    (Tensor::from_vec(dx, dy.shape()), d_gamma, d_beta)
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑批归一化↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓池化↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 3x3窗口内有效（不含填充）元素的个数
fn window_count(i: usize, j: usize, h: usize, w: usize) -> f32 {
    let rows = 1 + usize::from(i > 0) + usize::from(i + 1 < h);
    let cols = 1 + usize::from(j > 0) + usize::from(j + 1 < w);
    (rows * cols) as f32
}

/// 3x3平均池化，步长1，填充1，填充位置不计入分母
pub(super) fn avg_pool_3x3_forward(x: &Tensor) -> Result<Tensor, NasError> {
    let (n, c, h, w) = dims4(x, "3x3平均池化")?;
    let xs = x.data_as_slice();
    let mut out = vec![0.; xs.len()];
    for plane in 0..n * c {
        let base = plane * h * w;
        for i in 0..h {
            for j in 0..w {
                let mut acc = 0.;
                for ii in i.saturating_sub(1)..(i + 2).min(h) {
                    for jj in j.saturating_sub(1)..(j + 2).min(w) {
                        acc += xs[base + ii * w + jj];
                    }
                }
                out[base + i * w + j] = acc / window_count(i, j, h, w);
            }
        }
    }
    Ok(Tensor::from_vec(out, x.shape()))
}

pub(super) fn avg_pool_3x3_backward(dy: &Tensor) -> Tensor {
    let (n, c, h, w) = (dy.shape()[0], dy.shape()[1], dy.shape()[2], dy.shape()[3]);
    let dys = dy.data_as_slice();
    let mut dx = vec![0.; dys.len()];
    for plane in 0..n * c {
        let base = plane * h * w;
        for i in 0..h {
            for j in 0..w {
                let g = dys[base + i * w + j] / window_count(i, j, h, w);
                for ii in i.saturating_sub(1)..(i + 2).min(h) {
                    for jj in j.saturating_sub(1)..(j + 2).min(w) {
                        dx[base + ii * w + jj] += g;
                    }
                }
            }
        }
    }
    Tensor::from_vec(dx, dy.shape())
}

/// `[N, C, H, W]` -> `[N, C]`
pub(super) fn global_avg_pool_forward(x: &Tensor) -> Result<Tensor, NasError> {
    let (n, c, h, w) = dims4(x, "全局平均池化")?;
    let hw = (h * w).max(1);
    let out = x
        .data_as_slice()
        .chunks(hw)
        .map(|plane| plane.iter().sum::<f32>() / hw as f32)
        .collect::<Vec<_>>();
    Ok(Tensor::from_vec(out, &[n, c]))
}

pub(super) fn global_avg_pool_backward(dy: &Tensor, x_shape: &[usize]) -> Tensor {
    let hw = (x_shape[2] * x_shape[3]).max(1);
    let dx = dy
        .data_as_slice()
        .iter()
        .flat_map(|&g| std::iter::repeat_n(g / hw as f32, hw))
        .collect::<Vec<_>>();
    Tensor::from_vec(dx, x_shape)
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑池化↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓全连接↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// y[n,o] = Σ_i x[n,i] · W[o,i] + b[o]
pub(super) fn linear_forward(
    x: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
) -> Result<Tensor, NasError> {
    let (n, in_features) = dims2(x, "全连接层")?;
    let (out_features, w_in) = dims2(weight, "全连接层权重")?;
    if w_in != in_features {
        return Err(NasError::Computation(format!(
            "全连接层的输入特征数{in_features}与权重形状{:?}不匹配",
            weight.shape()
        )));
    }
    let (xs, ws) = (x.data_as_slice(), weight.data_as_slice());
    let mut out = vec![0.; n * out_features];
    for b in 0..n {
        let row = &xs[b * in_features..(b + 1) * in_features];
        for o in 0..out_features {
            let w_row = &ws[o * in_features..(o + 1) * in_features];
            let dot = row.iter().zip(w_row).map(|(a, k)| a * k).sum::<f32>();
            out[b * out_features + o] = dot + bias.map_or(0., |t| t.data_as_slice()[o]);
        }
    }
    Ok(Tensor::from_vec(out, &[n, out_features]))
}

/// 返回`(dx, dW, db)`
pub(super) fn linear_backward(x: &Tensor, weight: &Tensor, dy: &Tensor) -> (Tensor, Tensor, Tensor) {
    let (n, in_features) = (x.shape()[0], x.shape()[1]);
    let out_features = weight.shape()[0];
    let (xs, ws, dys) = (x.data_as_slice(), weight.data_as_slice(), dy.data_as_slice());
    let mut dx = vec![0.; xs.len()];
    let mut dw = vec![0.; ws.len()];
    let mut db = vec![0.; out_features];
    for b in 0..n {
        for o in 0..out_features {
            let g = dys[b * out_features + o];
            db[o] += g;
            for i in 0..in_features {
                dx[b * in_features + i] += g * ws[o * in_features + i];
                dw[o * in_features + i] += g * xs[b * in_features + i];
            }
        }
    }
    (
        Tensor::from_vec(dx, x.shape()),
        Tensor::from_vec(dw, weight.shape()),
        Tensor::from_vec(db, &[out_features]),
    )
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑全连接↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/// 按行做数值稳定的softmax
pub(super) fn softmax_rows(logits: &Tensor) -> Result<Tensor, NasError> {
    let (_, k) = dims2(logits, "softmax")?;
    let mut out = logits.to_vec();
    for row in out.chunks_mut(k.max(1)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    Ok(Tensor::from_vec(out, logits.shape()))
}

/// 把目标张量（形状`[N]`或`[N, 1]`，元素为类别下标）解析为下标列表
pub(super) fn class_labels(target: &Tensor, batch: usize, classes: usize) -> Result<Vec<usize>, NasError> {
    if target.size() != batch {
        return Err(NasError::Computation(format!(
            "类别标签数{}与批大小{batch}不一致",
            target.size()
        )));
    }
    target
        .data_as_slice()
        .iter()
        .map(|&v| {
            let label = v.round();
            if label < 0. || label as usize >= classes {
                Err(NasError::Computation(format!(
                    "类别标签{v}超出范围[0, {classes})"
                )))
            } else {
                Ok(label as usize)
            }
        })
        .collect()
}
