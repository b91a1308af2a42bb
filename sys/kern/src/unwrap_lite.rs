// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A trimmed-down `.unwrap()` that doesn't require the unwrapped type (or its
//! error side, for `Result`) to implement `Debug`.
//!
//! The standard library's `Option::unwrap`/`Result::unwrap` format the
//! offending value into the panic message, which pulls in `core::fmt`
//! machinery that this kernel would rather not pay for at every call site
//! that's merely asserting an internal invariant rather than reporting a
//! user-facing error.

pub trait UnwrapLite {
    type Item;

    /// Returns the contained value, or panics with a fixed message that does
    /// not attempt to format the `None`/`Err` case.
    fn unwrap_lite(self) -> Self::Item;
}

impl<T> UnwrapLite for Option<T> {
    type Item = T;

    fn unwrap_lite(self) -> T {
        match self {
            Some(x) => x,
            None => panic!("unwrap_lite on None"),
        }
    }
}

impl<T, E> UnwrapLite for Result<T, E> {
    type Item = T;

    fn unwrap_lite(self) -> T {
        match self {
            Ok(x) => x,
            Err(_) => panic!("unwrap_lite on Err"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_some_and_ok() {
        assert_eq!(Some(5).unwrap_lite(), 5);
        assert_eq!(Result::<_, ()>::Ok(5).unwrap_lite(), 5);
    }

    #[test]
    #[should_panic]
    fn panics_on_none() {
        None::<u8>.unwrap_lite();
    }

    #[test]
    #[should_panic]
    fn panics_on_err() {
        Result::<u8, &str>::Err("nope").unwrap_lite();
    }
}
