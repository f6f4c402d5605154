#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]

//! Entry point macros for corelane.

mod entry;
mod parse;

/// Runs an async `main` function on a freshly built corelane runtime.
///
/// The body is moved onto the runtime, so it must be `Send` and `'static`.
/// Function arguments are not allowed.
///
/// # Options
///
/// * `worker_threads = N`: number of worker queues, one per logical CPU by
///   default.
/// * `pin_workers = bool`: pin each worker thread to a CPU, `true` by default.
///
/// # Usage
///
/// ```no_run
/// #[corelane::main(worker_threads = 2)]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[corelane::main]`
///
/// ```no_run
/// fn main() {
///     corelane::runtime::Builder::new()
///         .worker_threads(2)
///         .try_build()
///         .expect("Failed building the Runtime")
///         .block_on(async move {
///             println!("Hello world");
///         })
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Like [`main`](macro@main), for `#[test]` functions. Each test gets its own
/// runtime, shut down when the test returns.
///
/// ```no_run
/// #[corelane::test(worker_threads = 1, pin_workers = false)]
/// async fn my_test() {
///     assert_eq!(corelane::spawn(async { 2 }).await.unwrap(), 2);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
