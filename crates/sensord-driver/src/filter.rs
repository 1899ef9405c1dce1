//! 过滤阶段接口
//!
//! 一个过滤阶段把 `I` 类型的采样值变换为 `O` 类型，或者主动抑制它。
//! 阶段可以串联：前一阶段的输出类型就是后一阶段的输入类型，
//! 串联关系在编译期检查，通过 [`FilterChain::then`] 组装。
//!
//! # 返回值约定
//!
//! - `Ok(Some(out))`: 产生一个输出
//! - `Ok(None)`: 主动抑制（不是错误，计入 `suppressed`）
//! - `Err(FilterError::MalformedSample)`: 输入无法处理，丢弃并计入 `filter_drops`

use crate::FilterError;
use std::marker::PhantomData;

/// 过滤阶段
///
/// 阶段独占地运行在消费者执行上下文中，可以持有可变的内部状态
/// （例如上一个值、计数器），不需要内部同步。
pub trait Filter<I, O>: Send {
    /// 阶段名称（用于日志和错误信息）
    fn name(&self) -> &str;

    /// 处理一个输入值
    fn process(&mut self, input: &I) -> Result<Option<O>, FilterError>;

    /// 清除内部状态
    ///
    /// 通道重新附加到上游时调用，避免用停止前的状态判断新数据。
    fn reset(&mut self) {}
}

impl<I, O> Filter<I, O> for Box<dyn Filter<I, O>> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process(&mut self, input: &I) -> Result<Option<O>, FilterError> {
        (**self).process(input)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// 直通阶段（空过滤链）
struct Identity;

impl<T: Clone> Filter<T, T> for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&mut self, input: &T) -> Result<Option<T>, FilterError> {
        Ok(Some(input.clone()))
    }
}

/// 两个阶段的串联
struct Then<I, M, O> {
    first: Box<dyn Filter<I, M>>,
    second: Box<dyn Filter<M, O>>,
}

impl<I, M, O> Filter<I, O> for Then<I, M, O> {
    fn name(&self) -> &str {
        self.second.name()
    }

    fn process(&mut self, input: &I) -> Result<Option<O>, FilterError> {
        match self.first.process(input)? {
            Some(mid) => self.second.process(&mid),
            None => Ok(None),
        }
    }

    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }
}

/// 有序的过滤链
///
/// # 示例
///
/// ```rust
/// use sensord_driver::{Filter, FilterChain, FnFilter};
///
/// let mut chain = FilterChain::<u32>::identity()
///     .then(FnFilter::map("double", |v: &u32| v * 2))
///     .then(FnFilter::keep_if("even-only", |v: &u32| v % 4 == 0));
///
/// assert_eq!(chain.stage_names(), ["double", "even-only"]);
/// assert_eq!(chain.process(&2).unwrap(), Some(4));
/// assert_eq!(chain.process(&3).unwrap(), None);
/// ```
pub struct FilterChain<I, O = I> {
    filter: Box<dyn Filter<I, O>>,
    stages: Vec<String>,
}

impl<T: Clone + Send + 'static> FilterChain<T, T> {
    /// 空过滤链：原样输出输入值
    pub fn identity() -> Self {
        Self {
            filter: Box::new(Identity),
            stages: Vec::new(),
        }
    }
}

impl<I: 'static, O: 'static> FilterChain<I, O> {
    /// 以单个阶段开始一条过滤链
    pub fn new(stage: impl Filter<I, O> + 'static) -> Self {
        let stages = vec![stage.name().to_string()];
        Self {
            filter: Box::new(stage),
            stages,
        }
    }

    /// 在链尾追加一个阶段
    pub fn then<N: 'static>(self, stage: impl Filter<O, N> + 'static) -> FilterChain<I, N> {
        let mut stages = self.stages;
        stages.push(stage.name().to_string());
        FilterChain {
            filter: Box::new(Then {
                first: self.filter,
                second: Box::new(stage),
            }),
            stages,
        }
    }
}

impl<I, O> FilterChain<I, O> {
    /// 各阶段名称（按执行顺序）
    pub fn stage_names(&self) -> &[String] {
        &self.stages
    }

    /// 阶段数量（空链为 0）
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl<I, O> Filter<I, O> for FilterChain<I, O> {
    fn name(&self) -> &str {
        self.stages.last().map(String::as_str).unwrap_or("identity")
    }

    fn process(&mut self, input: &I) -> Result<Option<O>, FilterError> {
        self.filter.process(input)
    }

    fn reset(&mut self) {
        self.filter.reset();
    }
}

impl<I, O> std::fmt::Debug for FilterChain<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain").field("stages", &self.stages).finish()
    }
}

/// 基于闭包的过滤阶段
pub struct FnFilter<I, O, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(&I) -> O>,
}

impl<I, O, F> FnFilter<I, O, F>
where
    F: FnMut(&I) -> Result<Option<O>, FilterError> + Send,
{
    /// 完整形式：闭包自己决定输出、抑制或报错
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O> FnFilter<I, O, Box<dyn FnMut(&I) -> Result<Option<O>, FilterError> + Send>>
where
    I: 'static,
    O: 'static,
{
    /// 一对一变换
    pub fn map(name: impl Into<String>, mut f: impl FnMut(&I) -> O + Send + 'static) -> Self {
        Self::new(
            name,
            Box::new(move |input: &I| -> Result<Option<O>, FilterError> { Ok(Some(f(input))) }),
        )
    }
}

impl<T> FnFilter<T, T, Box<dyn FnMut(&T) -> Result<Option<T>, FilterError> + Send>>
where
    T: Clone + 'static,
{
    /// 谓词为 false 时抑制
    pub fn keep_if(
        name: impl Into<String>,
        mut pred: impl FnMut(&T) -> bool + Send + 'static,
    ) -> Self {
        Self::new(
            name,
            Box::new(move |input: &T| -> Result<Option<T>, FilterError> {
                Ok(pred(input).then(|| input.clone()))
            }),
        )
    }
}

impl<I, O, F> Filter<I, O> for FnFilter<I, O, F>
where
    F: FnMut(&I) -> Result<Option<O>, FilterError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, input: &I) -> Result<Option<O>, FilterError> {
        (self.f)(input)
    }
}
