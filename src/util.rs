use std::{
    collections::HashMap,
    convert::TryFrom,
    hash::Hash,
    ops::{Add, Div},
};

macro_rules! time_info {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::info!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

macro_rules! time_trace {
    ($name:expr, $f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();
        log::trace!("{} (took {:?})", $name, end.duration_since(start));
        result
    }};
}

macro_rules! time {
    ($f:block) => {{
        let start = std::time::Instant::now();
        let result = $f;
        let end = std::time::Instant::now();

        (result, end.duration_since(start))
    }};
}

pub fn mean<T>(data: &[T]) -> Option<T>
where
    T: Copy + Default + Add<T, Output = T> + Div<T, Output = T> + TryFrom<usize> + Ord,
{
    if let Ok(len) = T::try_from(data.len()) {
        if len == T::default() {
            None
        } else {
            let sum = data.iter().fold(T::default(), |acc, x| acc + *x);

            Some(sum / len)
        }
    } else {
        None
    }
}

pub fn median_of_sorted<T>(data: &[T]) -> Option<T>
where
    T: Add<T, Output = T> + Div<T, Output = T> + From<u32> + Copy,
{
    let size = data.len();

    match size {
        0 => None,
        even if even % 2 == 0 => {
            let fst_med = data[(size / 2) - 1];
            let snd_med = data[size / 2];

            Some((fst_med + snd_med) / T::from(2))
        }
        odd => Some(data[odd / 2]),
    }
}

pub fn mode<C>(data: C) -> Option<C::Item>
where
    C: IntoIterator,
    C::Item: Ord + Hash,
{
    let frequencies = data.into_iter().fold(HashMap::new(), |mut freqs, value| {
        *freqs.entry(value).or_insert(0) += 1;
        freqs
    });

    // ties are broken towards the smallest value to keep summaries reproducible
    frequencies
        .into_iter()
        .max_by(|(v1, c1), (v2, c2)| c1.cmp(c2).then_with(|| v2.cmp(v1)))
        .map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_of_small_samples() {
        assert_eq!(mean::<u64>(&[]), None);
        assert_eq!(mean(&[2_u64, 4, 6]), Some(4));
        assert_eq!(median_of_sorted(&[1_u64, 3, 5, 7]), Some(4));
        assert_eq!(median_of_sorted(&[1_u64, 3, 5]), Some(3));
        assert_eq!(mode(vec![3, 1, 3, 1, 2]), Some(1));
    }
}
