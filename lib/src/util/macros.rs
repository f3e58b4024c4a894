/// Builds a [`Dict`](crate::value::Dict):
///
/// ```rust
/// let dict: quire::value::Dict = quire::dict!["title" => "Hello", "draft" => false];
/// assert_eq!(dict.len(), 2);
/// ```
#[macro_export]
macro_rules! dict {
    ($($key:expr => $value:expr),* $(,)?) => ({
        #[allow(unused_mut)]
        let mut dict = $crate::value::Dict::new();
        $(dict.insert($key.into(), $value.into());)*
        dict
    });
}

pub use dict;
