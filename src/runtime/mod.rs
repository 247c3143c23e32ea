//! The two scheduling primitives the sync core needs: detached local tasks and
//! timers. Everything runs on one logical thread; nothing here is `Send`.

use std::future::Future;
use std::time::Duration;

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub fn spawn_local<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(fut);
}

/// Must be called from inside a `tokio::task::LocalSet`.
#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
pub fn spawn_local<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(fut));
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub async fn sleep(duration: Duration) {
    gloo_timers::future::sleep(duration).await;
}

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
