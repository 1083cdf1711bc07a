//! 数据加载模块
//!
//! # 主要组件
//!
//! - [`TensorDataset`]: 持有特征和标签的数据集
//! - [`DataLoader`]: `PyTorch` 风格的数据批量加载器；`queue()`给出无限循环的批次队列，
//!   供候选网络的`*_queue`系列方法按需拉取
//!
//! # 使用示例
//!
//! ```ignore
//! use only_nas::data::{DataLoader, TensorDataset};
//!
//! let dataset = TensorDataset::new(train_x, train_y);
//! let loader = DataLoader::new(dataset, 32).shuffle(true).seed(42);
//! let mut queue = loader.queue();
//! candidate.train_queue(&mut queue, &mut optimizer, &CrossEntropyLoss, &[], 10)?;
//! ```

mod dataloader;


pub use dataloader::{DataLoader, DataLoaderIterator, DataQueue, TensorDataset};
