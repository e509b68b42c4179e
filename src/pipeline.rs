//! Explicit-failure pipeline with deferred cleanup.
//!
//! A [`Pipeline`] is a `Result` that also carries the release actions of
//! every resource acquired along the way.  Stages after a failure are
//! skipped, but the cleanups registered before it still run when the
//! pipeline is evaluated:
//!
//! ```ignore
//! let written = Pipeline::from(serialize(&doc))
//!     .chain(|bytes| stage(bytes))      // registers removal of the temp file
//!     .chain(|temp| copy_into_place(&temp, target))
//!     .evaluate();                      // temp file removed on every path
//! ```

use std::future::Future;

use log::debug;

use crate::error::Error;

type Cleanup = Box<dyn FnOnce() + Send>;

#[must_use = "cleanups only run when the pipeline is evaluated"]
pub struct Pipeline<T> {
    outcome: Result<T, Error>,
    cleanups: Vec<Cleanup>,
}

impl<T> Pipeline<T> {
    pub fn succeed(value: T) -> Self {
        Self {
            outcome: Ok(value),
            cleanups: Vec::new(),
        }
    }

    pub fn fail(err: impl Into<Error>) -> Self {
        Self {
            outcome: Err(err.into()),
            cleanups: Vec::new(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Pipeline<U> {
        Pipeline {
            outcome: self.outcome.map(f),
            cleanups: self.cleanups,
        }
    }

    /// Runs a dependent step.  `f` is never invoked if this pipeline has
    /// already failed.
    pub fn chain<U>(self, f: impl FnOnce(T) -> Pipeline<U>) -> Pipeline<U> {
        let mut cleanups = self.cleanups;
        let outcome = match self.outcome {
            Ok(value) => {
                let next = f(value);
                cleanups.extend(next.cleanups);
                next.outcome
            }
            Err(e) => Err(e),
        };
        Pipeline { outcome, cleanups }
    }

    pub async fn chain_async<U, F, Fut>(self, f: F) -> Pipeline<U>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Pipeline<U>>,
    {
        let mut cleanups = self.cleanups;
        let outcome = match self.outcome {
            Ok(value) => {
                let next = f(value).await;
                cleanups.extend(next.cleanups);
                next.outcome
            }
            Err(e) => Err(e),
        };
        Pipeline { outcome, cleanups }
    }

    /// Registers a release action.  It runs exactly once, at evaluation,
    /// whether or not a later stage fails.
    pub fn with_cleanup(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.cleanups.push(Box::new(release));
        self
    }

    /// Forces the pipeline: cleanups run in reverse registration order,
    /// then the outcome is returned.
    pub fn evaluate(self) -> Result<T, Error> {
        let count = self.cleanups.len();
        for release in self.cleanups.into_iter().rev() {
            release();
        }
        if count > 0 {
            debug!("Pipeline ran {} cleanup(s)", count);
        }
        self.outcome
    }
}

impl<T, E: Into<Error>> From<Result<T, E>> for Pipeline<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::succeed(value),
            Err(e) => Self::fail(e),
        }
    }
}

/// Three-stage composition: `a`, then `f` on its value, then `g` on that.
pub fn chain2<A, B, C>(
    a: Pipeline<A>,
    f: impl FnOnce(A) -> Pipeline<B>,
    g: impl FnOnce(B) -> Pipeline<C>,
) -> Pipeline<C> {
    a.chain(f).chain(g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Cleanup) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::clone(&log);
        let make = move |name: &'static str| -> Cleanup {
            let log = Arc::clone(&handle);
            Box::new(move || log.lock().unwrap().push(name))
        };
        (log, make)
    }

    fn config_err() -> Error {
        Error::Config("boom".into())
    }

    #[test]
    fn map_transforms_success_only() {
        assert_eq!(Pipeline::succeed(2).map(|v| v * 10).evaluate().unwrap(), 20);
        let failed: Pipeline<i32> = Pipeline::fail(config_err());
        assert!(failed.map(|v| v * 10).evaluate().is_err());
    }

    #[test]
    fn chain_short_circuits() {
        let mut called = false;
        let result = Pipeline::<i32>::fail(config_err())
            .chain(|v| {
                called = true;
                Pipeline::succeed(v + 1)
            })
            .evaluate();
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!called);
    }

    #[test]
    fn cleanups_run_in_reverse_on_success() {
        let (log, make) = recorder();
        let (first, second) = (make("first"), make("second"));
        let result = Pipeline::succeed(1)
            .with_cleanup(first)
            .chain(|v| Pipeline::succeed(v + 1).with_cleanup(second))
            .evaluate();
        assert_eq!(result.unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn upstream_cleanups_run_after_downstream_failure() {
        let (log, make) = recorder();
        let (file, never) = (make("file"), make("never"));
        let result = Pipeline::succeed("handle")
            .with_cleanup(file)
            .chain(|_| Pipeline::<()>::fail(config_err()))
            .chain(|_| Pipeline::succeed(()).with_cleanup(never))
            .evaluate();
        assert!(result.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["file"]);
    }

    #[test]
    fn chain2_composes_three_stages() {
        let result = chain2(
            Pipeline::succeed("10.0.1.5"),
            |ip| Pipeline::succeed(format!("{ip}:8301")),
            |ep| Pipeline::succeed(ep.len()),
        );
        assert_eq!(result.evaluate().unwrap(), "10.0.1.5:8301".len());

        let mut third_ran = false;
        let result = chain2(
            Pipeline::succeed(1),
            |_| Pipeline::<i32>::fail(config_err()),
            |v| {
                third_ran = true;
                Pipeline::succeed(v)
            },
        );
        assert!(result.evaluate().is_err());
        assert!(!third_ran);
    }

    #[tokio::test]
    async fn chain_async_keeps_cleanups() {
        let (log, make) = recorder();
        let release = make("socket");
        let result = Pipeline::succeed(3)
            .chain_async(|v| async move { Pipeline::succeed(v * 2).with_cleanup(release) })
            .await
            .evaluate();
        assert_eq!(result.unwrap(), 6);
        assert_eq!(*log.lock().unwrap(), vec!["socket"]);
    }

    #[test]
    fn from_result_converts_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        let pipeline: Pipeline<()> = Err::<(), _>(Error::io("write")(io)).into();
        assert!(pipeline.evaluate().unwrap_err().to_string().starts_with("write"));
    }
}
