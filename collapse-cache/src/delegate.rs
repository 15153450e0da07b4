/*!
The [`CacheDelegate`] collaborator trait: the underlying async cache
backend a [`crate::ResilientCache`] wraps with a timeout and a circuit
breaker.
*/

use std::{future::Future, pin::Pin};

use collapse_core::BoxError;

/**
A boxed, `'static` future, the shape [`CacheDelegate`]'s methods return.
*/
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/**
The cache backend being wrapped (spec §6's `delegateCache`).
*/
pub trait CacheDelegate<K, V>: Send + Sync + 'static {
    /**
    Look up `key`.
    */
    fn get(&self, key: K) -> BoxFuture<Result<V, BoxError>>;

    /**
    Store `value` under `key`.
    */
    fn put(&self, key: K, value: V) -> BoxFuture<Result<(), BoxError>>;
}

/**
Adapts a pair of closures into a [`CacheDelegate`], for callers who'd
rather not name a type for a simple in-memory or thin-wrapper backend.
*/
pub struct FnCacheDelegate<G, P> {
    get: G,
    put: P,
}

/**
Build a [`CacheDelegate`] from a `get` and a `put` closure.
*/
pub fn delegate<K, V, G, GFut, P, PFut>(get: G, put: P) -> FnCacheDelegate<G, P>
where
    G: Fn(K) -> GFut + Send + Sync + 'static,
    GFut: Future<Output = Result<V, BoxError>> + Send + 'static,
    P: Fn(K, V) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    FnCacheDelegate { get, put }
}

impl<K, V, G, GFut, P, PFut> CacheDelegate<K, V> for FnCacheDelegate<G, P>
where
    G: Fn(K) -> GFut + Send + Sync + 'static,
    GFut: Future<Output = Result<V, BoxError>> + Send + 'static,
    P: Fn(K, V) -> PFut + Send + Sync + 'static,
    PFut: Future<Output = Result<(), BoxError>> + Send + 'static,
    K: Send + 'static,
    V: Send + 'static,
{
    fn get(&self, key: K) -> BoxFuture<Result<V, BoxError>> {
        Box::pin((self.get)(key))
    }

    fn put(&self, key: K, value: V) -> BoxFuture<Result<(), BoxError>> {
        Box::pin((self.put)(key, value))
    }
}
