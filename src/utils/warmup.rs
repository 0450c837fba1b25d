use futures_util::{Stream, StreamExt, pin_mut};
use std::future::Future;

/// Drains a row stream into `sink` in chunks of `batch_size` and returns the
/// number of rows seen. The first failed row aborts the drain.
pub async fn in_batches<T, S, F, Fut>(rows: S, batch_size: usize, mut sink: F) -> Result<usize, sqlx::Error>
where
    S: Stream<Item = Result<T, sqlx::Error>>,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = ()>,
{
    let chunks = rows.chunks(batch_size.max(1));
    pin_mut!(chunks);

    let mut total = 0usize;
    while let Some(chunk) = chunks.next().await {
        let batch = chunk.into_iter().collect::<Result<Vec<T>, _>>()?;
        total += batch.len();
        sink(batch).await;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[actix_web::test]
    async fn feeds_full_batches_then_the_remainder() {
        let rows = stream::iter((1..=5).map(Ok::<u32, sqlx::Error>));
        let mut seen = Vec::new();

        let total = in_batches(rows, 2, |batch| {
            seen.push(batch);
            async {}
        })
        .await
        .unwrap();

        assert_eq!(total, 5);
        assert_eq!(seen, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[actix_web::test]
    async fn a_failed_row_stops_the_drain() {
        let rows = stream::iter(vec![Ok(1u32), Err(sqlx::Error::RowNotFound), Ok(3)]);
        let mut batches = 0;

        let result = in_batches(rows, 1, |_| {
            batches += 1;
            async {}
        })
        .await;

        assert!(result.is_err());
        assert_eq!(batches, 1);
    }

    #[actix_web::test]
    async fn zero_batch_size_is_treated_as_one() {
        let rows = stream::iter(vec![Ok::<_, sqlx::Error>("a"), Ok("b")]);
        let mut sizes = Vec::new();

        in_batches(rows, 0, |batch| {
            sizes.push(batch.len());
            async {}
        })
        .await
        .unwrap();

        assert_eq!(sizes, vec![1, 1]);
    }
}
