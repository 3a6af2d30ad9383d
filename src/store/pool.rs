use super::StoreError;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio_postgres::Client;

/// Fixed-size pool of postgres clients.
///
/// Checkout is scoped: the guard hands its client back when dropped, on
/// every exit path, so release never depends on caller discipline.
pub struct Pool {
    inner: Arc<Inner>,
}

struct Inner {
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
}

impl Pool {
    /// Connect `size` clients to the database at `url`.
    pub async fn connect(url: &str, size: usize) -> Result<Self, StoreError> {
        log::info!("connecting {size} clients to database");
        let tls = tokio_postgres::tls::NoTls;
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            let (client, connection) = tokio_postgres::connect(url, tls).await?;
            tokio::spawn(connection);
            client
                .execute("SET client_min_messages TO WARNING", &[])
                .await?;
            idle.push(client);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(size)),
            }),
        })
    }

    /// Scoped checkout; waits until a client is idle.
    pub async fn checkout(&self) -> Pooled {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .expect("pool semaphore never closes");
        let client = self
            .inner
            .idle
            .lock()
            .expect("pool mutex")
            .pop()
            .expect("permit guarantees an idle client");
        Pooled {
            client: Some(client),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

/// A checked-out client. Dereferences to [`tokio_postgres::Client`].
pub struct Pooled {
    client: Option<Client>,
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for Pooled {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client present until drop")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.inner.idle.lock().expect("pool mutex").push(client);
        }
    }
}
