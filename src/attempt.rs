/// Tries each candidate in order and stops at the first success.
///
/// Returns `None` when there was nothing to try, otherwise either the first
/// success or the error of the last attempt.
pub(crate) fn first_success<C, T, E>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: impl FnMut(C) -> Result<T, E>,
) -> Option<Result<T, E>> {
    let mut last = None;
    for candidate in candidates {
        match attempt(candidate) {
            Ok(value) => return Some(Ok(value)),
            Err(error) => last = Some(Err(error)),
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn stops_at_first_success() {
        let mut tried = Vec::new();
        let result = first_success([1, 2, 3], |n| {
            tried.push(n);
            if n == 2 {
                Ok(n * 10)
            } else {
                Err(n)
            }
        });
        assert_eq!(result, Some(Ok(20)));
        assert_eq!(tried, vec![1, 2]);
    }

    #[test]
    fn returns_last_error() {
        let result: Option<Result<(), _>> = first_success(["a", "b"], Err);
        assert_eq!(result, Some(Err("b")));
    }

    #[test]
    fn nothing_to_try() {
        let result: Option<Result<(), ()>> = first_success(Vec::<u8>::new(), |_| Ok(()));
        assert_eq!(result, None);
    }
}
