use std::sync::Arc;

use crate::error::FsResult;
use crate::op::{FsOutput, Operation};

/// Terminal step of a chain: actually runs the operation.
pub trait OperationDispatcher: Send + Sync {
    fn dispatch(&self, operation: Operation) -> FsResult<FsOutput>;
}

/// Wraps every operation a filesystem executes.
///
/// Implementations must call [`Chain::proceed`] exactly once unless they
/// deliberately short-circuit.
pub trait FileSystemInterceptor: Send + Sync {
    fn intercept(&self, operation: Operation, chain: Chain<'_>) -> FsResult<FsOutput>;
}

/// The interceptors that have not run yet, followed by the dispatcher.
pub struct Chain<'a> {
    interceptors: &'a [Arc<dyn FileSystemInterceptor>],
    dispatcher: &'a dyn OperationDispatcher,
}

impl<'a> Chain<'a> {
    pub fn new(
        interceptors: &'a [Arc<dyn FileSystemInterceptor>],
        dispatcher: &'a dyn OperationDispatcher,
    ) -> Self {
        Self {
            interceptors,
            dispatcher,
        }
    }

    pub fn proceed(self, operation: Operation) -> FsResult<FsOutput> {
        match self.interceptors.split_first() {
            Some((first, rest)) => first.intercept(
                operation,
                Chain {
                    interceptors: rest,
                    dispatcher: self.dispatcher,
                },
            ),
            None => self.dispatcher.dispatch(operation),
        }
    }
}
