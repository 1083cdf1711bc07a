/*
 * @Description  : 参数池（ParamPool）：超网中所有可训练参数与缓冲区（buffer）的唯一持有者
 *
 * 每个张量在注册时获得一个稳定的`ParamId`，模块树只保存`ParamId`，
 * 于是“同一个张量”的判断（参数共享/绑定）变成了对`ParamId`的比较。
 */

use crate::errors::NasError;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// 参数池的共享句柄：同一个超网派生出的所有候选网络、计算图与优化器都持有它
pub type PoolHandle = Rc<RefCell<ParamPool>>;

/// 参数池中张量的稳定标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamId(usize);

impl ParamId {
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 成员种类：可训练参数，或不参与梯度更新的缓冲区（如BN的滑动均值/方差）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Parameters,
    Buffers,
}

impl FromStr for MemberKind {
    type Err = NasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parameters" => Ok(Self::Parameters),
            "buffers" => Ok(Self::Buffers),
            other => Err(NasError::Config(format!("未知的成员种类：{other}"))),
        }
    }
}

// ==================== Init 枚举 ====================

/// 参数初始化策略。权重的形状约定为`[out, in, ...]`，fan_in为除首维外各维之积
#[derive(Debug, Clone)]
pub enum Init {
    /// 常数初始化
    Constant(f32),
    /// 全零
    Zeros,
    /// 全一
    Ones,
    /// 正态分布
    Normal { mean: f32, std: f32 },
    /// Kaiming/He 初始化（适用于 `ReLU`）
    Kaiming,
    /// Xavier/Glorot 初始化
    Xavier,
}

impl Init {
    /// 生成初始化后的 Tensor（使用指定的 RNG）
    pub fn generate_with_rng(&self, shape: &[usize], rng: &mut StdRng) -> Tensor {
        let fan_out = shape.first().copied().unwrap_or(1);
        let fan_in = shape.iter().skip(1).product::<usize>().max(1);
        match self {
            Self::Constant(v) => &Tensor::ones(shape) * *v,
            Self::Zeros => Tensor::zeros(shape),
            Self::Ones => Tensor::ones(shape),
            Self::Normal { mean, std } => Tensor::normal_with_rng(*mean, *std, shape, rng),
            Self::Kaiming => {
                let std = (2.0 / fan_in as f32).sqrt();
                Tensor::normal_with_rng(0.0, std, shape, rng)
            }
            Self::Xavier => {
                let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
                Tensor::normal_with_rng(0.0, std, shape, rng)
            }
        }
    }
}

// ==================== ParamPool ====================

struct PoolEntry {
    kind: MemberKind,
    value: Tensor,
    /// 仅参数有梯度；None 表示梯度已被清空（或尚未计算）
    grad: Option<Tensor>,
}

/// 参数池
pub struct ParamPool {
    entries: Vec<PoolEntry>,
    /// 池级别的随机数生成器（用于参数初始化）
    rng: StdRng,
}

impl ParamPool {
    /// 创建参数池；给定`seed`时参数初始化是确定性的
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            entries: Vec::new(),
            rng,
        }
    }

    pub fn into_handle(self) -> PoolHandle {
        Rc::new(RefCell::new(self))
    }

    /// 注册一个可训练参数
    pub fn register_parameter(&mut self, shape: &[usize], init: Init) -> ParamId {
        let value = init.generate_with_rng(shape, &mut self.rng);
        self.push(MemberKind::Parameters, value)
    }

    /// 注册一个缓冲区
    pub fn register_buffer(&mut self, value: Tensor) -> ParamId {
        self.push(MemberKind::Buffers, value)
    }

    fn push(&mut self, kind: MemberKind, value: Tensor) -> ParamId {
        let id = ParamId(self.entries.len());
        self.entries.push(PoolEntry {
            kind,
            value,
            grad: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self, id: ParamId) -> MemberKind {
        self.entries[id.0].kind
    }

    /// 某一种类的全部成员，按注册顺序
    pub fn ids(&self, kind: MemberKind) -> Vec<ParamId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind == kind)
            .map(|(i, _)| ParamId(i))
            .collect()
    }

    pub fn value(&self, id: ParamId) -> &Tensor {
        &self.entries[id.0].value
    }

    pub fn value_mut(&mut self, id: ParamId) -> &mut Tensor {
        &mut self.entries[id.0].value
    }

    /// 把`src`的值原地拷贝进`id`对应的张量
    pub fn assign(&mut self, id: ParamId, src: &Tensor) -> Result<(), NasError> {
        self.entries[id.0].value.copy_from(src)?;
        Ok(())
    }

    pub fn grad(&self, id: ParamId) -> Option<&Tensor> {
        self.entries[id.0].grad.as_ref()
    }

    /// 直接设置梯度（外部计算好的梯度经由此处写回）
    pub fn set_grad(&mut self, id: ParamId, grad: Option<Tensor>) -> Result<(), NasError> {
        let entry = &mut self.entries[id.0];
        if entry.kind != MemberKind::Parameters {
            return Err(NasError::Computation(format!("缓冲区{id}不能持有梯度")));
        }
        if let Some(g) = &grad {
            if !g.is_same_shape(&entry.value) {
                return Err(NasError::Computation(format!(
                    "参数{id}的梯度形状{:?}与参数形状{:?}不一致",
                    g.shape(),
                    entry.value.shape()
                )));
            }
        }
        entry.grad = grad;
        Ok(())
    }

    /// 累加梯度（反向传播时调用）；对缓冲区调用会被忽略
    pub fn accumulate_grad(&mut self, id: ParamId, grad: &Tensor) -> Result<(), NasError> {
        let entry = &mut self.entries[id.0];
        if entry.kind != MemberKind::Parameters {
            return Ok(());
        }
        if !grad.is_same_shape(&entry.value) {
            return Err(NasError::Computation(format!(
                "参数{id}的梯度形状{:?}与参数形状{:?}不一致",
                grad.shape(),
                entry.value.shape()
            )));
        }
        match &mut entry.grad {
            Some(existing) => *existing += grad,
            slot @ None => *slot = Some(grad.clone()),
        }
        Ok(())
    }

    /// 清空指定参数的梯度
    pub fn zero_grad<I: IntoIterator<Item = ParamId>>(&mut self, ids: I) {
        for id in ids {
            self.entries[id.0].grad = None;
        }
    }

    pub fn zero_grad_all(&mut self) {
        for entry in &mut self.entries {
            entry.grad = None;
        }
    }
}
