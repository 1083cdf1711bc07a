/*
 * @Description  : 超网（SuperNet）与候选网络（CandidateNet）的错误类型
 */

use super::TensorError;
use thiserror::Error;

/// 超网、候选网络及其周边组件（优化器、损失函数、配置、持久化）的统一错误类型
#[derive(Error, Debug)]
pub enum NasError {
    /// 模式字符串既不是`train`也不是`eval`
    #[error("无法识别的模式：{0}（仅支持 train/eval）")]
    UnrecognizedMode(String),
    /// 请求了不属于当前候选网络激活成员集的参数
    #[error("无法获取不属于当前候选网络的参数的梯度：{}", .0.join(", "))]
    InvalidParameterSubset(Vec<String>),
    #[error("不支持的操作：{0}")]
    UnsupportedOperation(String),

    #[error("非法的基因型：{0}")]
    InvalidGenotype(String),
    #[error("未知的原语操作：{0}")]
    UnknownPrimitive(String),
    #[error("不支持的 rollout 类型：{0}")]
    UnsupportedRolloutType(String),
    #[error("数据队列已耗尽")]
    QueueExhausted,
    #[error("虚拟上下文恢复时成员不一致：{0}")]
    VirtualStateMismatch(String),
    #[error("状态字典不匹配：{0}")]
    StateDictMismatch(String),
    #[error("计算错误：{0}")]
    Computation(String),
    #[error("配置错误：{0}")]
    Config(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
