//! Small function helpers used to state and check the promise laws.

/// Returns its argument.
pub fn identity<T>(value: T) -> T {
    value
}

/// Composes two functions left to right: the result applies `f`, then `g`.
///
/// ```
/// # use monadic_promise::compose;
/// let split_then_join = compose(
///     |s: String| s.split(',').map(str::to_string).collect::<Vec<_>>(),
///     |words: Vec<String>| words.join("_"),
/// );
/// assert_eq!(split_then_join("I,love,Rust".to_string()), "I_love_Rust");
/// ```
pub fn compose<A, B, C, F, G>(f: F, g: G) -> impl Fn(A) -> C
where
    F: Fn(A) -> B,
    G: Fn(B) -> C,
{
    move |a| g(f(a))
}
