use crate::error::{GraphError, Result};
use crate::types::{Edge, Link};

/// A lazy, one-shot sequence produced by a range scan.
///
/// `advance` moves to the next element and reports whether there is one;
/// `current` returns the element the last successful `advance` moved to.
/// Once `advance` returns `false` the sequence is finished and
/// `take_error` tells whether it ended normally.
///
/// Dropping a sequence releases whatever it holds. `close` does the same
/// eagerly and may be called any number of times.
pub trait GraphIterator: Send {
    type Item;

    /// Move to the next element. Returns `false` when the sequence is
    /// exhausted, failed, or closed.
    fn advance(&mut self) -> bool;

    /// The element reached by the last `advance`, or `None` before the
    /// first `advance` and after the end.
    fn current(&self) -> Option<Self::Item>;

    /// The error that cut the sequence short, if any. Taken once.
    fn take_error(&mut self) -> Option<GraphError>;

    /// Release held resources. Further `advance` calls return `false`.
    fn close(&mut self) -> Result<()>;

    /// Adapt into a std iterator of `Result`s. A sequence that ends
    /// abnormally yields its error as the last item.
    fn items(self) -> Items<Self>
    where
        Self: Sized,
    {
        Items {
            inner: self,
            done: false,
        }
    }
}

impl<I: GraphIterator + ?Sized> GraphIterator for Box<I> {
    type Item = I::Item;

    fn advance(&mut self) -> bool {
        (**self).advance()
    }

    fn current(&self) -> Option<Self::Item> {
        (**self).current()
    }

    fn take_error(&mut self) -> Option<GraphError> {
        (**self).take_error()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Sequence of links returned by [`Graph::links`](crate::Graph::links).
pub type LinkIterator = Box<dyn GraphIterator<Item = Link>>;

/// Sequence of edges returned by [`Graph::edges`](crate::Graph::edges).
pub type EdgeIterator = Box<dyn GraphIterator<Item = Edge>>;

/// std `Iterator` view over a [`GraphIterator`].
pub struct Items<I> {
    inner: I,
    done: bool,
}

impl<I: GraphIterator> Iterator for Items<I> {
    type Item = Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.inner.advance() {
            if let Some(item) = self.inner.current() {
                return Some(Ok(item));
            }
        }

        self.done = true;
        if let Some(err) = self.inner.take_error() {
            return Some(Err(err));
        }
        match self.inner.close() {
            Ok(()) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
