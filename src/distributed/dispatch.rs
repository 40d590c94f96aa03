//! Band dispatch
//!
//! The generation loop hands each band to a [`BandDispatcher`] and does not care how
//! the band gets computed. Two implementations:
//!
//! - [`RemoteDispatcher`]: the production path. One TCP round trip per band to the
//!   worker at the band's roster index, bounded by connect and call deadlines.
//! - [`LocalDispatcher`]: computes bands in-process. Used by tests, with knobs for
//!   slowing rounds down and failing a chosen worker.

use crate::distributed::error::BrokerError;
use crate::distributed::protocol::*;
use crate::grid::{Grid, RowBand};
use crate::worker;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Computes bands on behalf of the generation loop
///
/// Implementations must be cheap to share: the loop keeps one in an `Arc` and calls
/// `compute_band` from one spawned task per band.
pub trait BandDispatcher: Send + Sync + 'static {
    /// Number of workers this dispatcher can address
    fn roster_size(&self) -> usize;

    /// Compute one band on worker `worker`
    fn compute_band(
        &self,
        worker: usize,
        request: ComputeBandRequest,
    ) -> impl Future<Output = Result<Grid, BrokerError>> + Send;

    /// Ask every worker in the roster to terminate
    ///
    /// Best effort: failures are logged and the broadcast moves on. Returns the
    /// number of workers that acknowledged.
    fn shutdown_workers(&self) -> impl Future<Output = usize> + Send;
}

/// Check a returned band has the shape that was asked for
pub fn check_band_shape(request: &ComputeBandRequest, band: &Grid) -> Result<(), String> {
    let rows = request.end_y.saturating_sub(request.start_y);
    if band.width() != request.width || band.height() != rows {
        return Err(format!(
            "band [{}, {}) came back as {}x{}, expected {}x{}",
            request.start_y,
            request.end_y,
            band.width(),
            band.height(),
            request.width,
            rows
        ));
    }
    Ok(())
}

/// Dispatches bands to worker processes over TCP
#[derive(Debug, Clone)]
pub struct RemoteDispatcher {
    /// Worker addresses (IP:port), fixed for the broker's lifetime
    addresses: Vec<String>,

    /// Deadline for establishing a connection
    connect_timeout: Duration,

    /// Deadline for one band round trip, connection included
    call_timeout: Duration,
}

impl RemoteDispatcher {
    pub fn new(addresses: Vec<String>, connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            addresses,
            connect_timeout,
            call_timeout,
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    fn address(&self, worker: usize) -> Result<&str, BrokerError> {
        self.addresses
            .get(worker)
            .map(String::as_str)
            .ok_or_else(|| BrokerError::InvalidRequest(format!(
                "worker index {} outside roster of {}",
                worker,
                self.addresses.len()
            )))
    }

    async fn connect(&self, addr: &str) -> anyhow::Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out after {}ms", self.connect_timeout.as_millis()))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// One ComputeBand round trip, without the deadline
    async fn call(&self, addr: &str, request: &ComputeBandRequest) -> anyhow::Result<Message> {
        let mut stream = self.connect(addr).await?;
        write_message(&mut stream, &Message::ComputeBand(request.clone())).await?;
        expect_message(&mut stream).await
    }

    async fn shutdown_one(&self, addr: &str) -> anyhow::Result<()> {
        let mut stream = self.connect(addr).await?;
        write_message(&mut stream, &Message::WorkerShutdown).await?;
        match timeout(self.call_timeout, read_message(&mut stream)).await {
            Ok(Ok(Some(Message::Ack))) | Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(other))) => anyhow::bail!("Expected ACK, got {}", other.name()),
            Ok(Err(e)) => Err(e),
            Err(_) => anyhow::bail!("no ACK within {}ms", self.call_timeout.as_millis()),
        }
    }
}

impl BandDispatcher for RemoteDispatcher {
    fn roster_size(&self) -> usize {
        self.addresses.len()
    }

    fn compute_band(
        &self,
        worker: usize,
        request: ComputeBandRequest,
    ) -> impl Future<Output = Result<Grid, BrokerError>> + Send {
        async move {
            let addr = self.address(worker)?;

            debug!(worker, addr, start_y = request.start_y, end_y = request.end_y, "dispatching band");

            let reply = match timeout(self.call_timeout, self.call(addr, &request)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    return Err(BrokerError::Transport {
                        index: worker,
                        addr: addr.to_string(),
                        message: format!("{:#}", e),
                    })
                }
                Err(_) => {
                    return Err(BrokerError::Timeout {
                        index: worker,
                        addr: addr.to_string(),
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    })
                }
            };

            match reply {
                Message::BandResult(result) => {
                    check_band_shape(&request, &result.band).map_err(BrokerError::Protocol)?;
                    Ok(result.band)
                }
                Message::Error(err) => Err(BrokerError::Transport {
                    index: worker,
                    addr: addr.to_string(),
                    message: err.error,
                }),
                other => Err(BrokerError::Protocol(format!(
                    "worker {} replied {} to COMPUTE_BAND",
                    worker,
                    other.name()
                ))),
            }
        }
    }

    fn shutdown_workers(&self) -> impl Future<Output = usize> + Send {
        async move {
            let mut acknowledged = 0;
            for (worker, addr) in self.addresses.iter().enumerate() {
                match self.shutdown_one(addr).await {
                    Ok(()) => {
                        info!(worker, addr = %addr, "worker shut down");
                        acknowledged += 1;
                    }
                    Err(e) => warn!(worker, addr = %addr, error = %format!("{:#}", e), "worker shutdown failed"),
                }
            }
            acknowledged
        }
    }
}

/// Computes bands in-process
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    workers: usize,

    /// Sleep before each band, to make rounds observable from control-plane calls
    band_delay: Option<Duration>,

    /// Worker index whose calls fail
    failing_worker: Option<usize>,

    /// Bands computed so far, per worker index
    calls: Arc<Vec<AtomicUsize>>,

    /// Shutdown broadcasts received
    shutdowns: Arc<AtomicUsize>,
}

impl LocalDispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            band_delay: None,
            failing_worker: None,
            calls: Arc::new((0..workers).map(|_| AtomicUsize::new(0)).collect()),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every band by `delay`
    pub fn with_band_delay(mut self, delay: Duration) -> Self {
        self.band_delay = Some(delay);
        self
    }

    /// Make every call to `worker` fail with a transport error
    pub fn with_failing_worker(mut self, worker: usize) -> Self {
        self.failing_worker = Some(worker);
        self
    }

    /// Bands computed by `worker`
    pub fn calls(&self, worker: usize) -> usize {
        self.calls.get(worker).map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Shutdown broadcasts received
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl BandDispatcher for LocalDispatcher {
    fn roster_size(&self) -> usize {
        self.workers
    }

    fn compute_band(
        &self,
        worker: usize,
        request: ComputeBandRequest,
    ) -> impl Future<Output = Result<Grid, BrokerError>> + Send {
        async move {
            if let Some(delay) = self.band_delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(counter) = self.calls.get(worker) {
                counter.fetch_add(1, Ordering::SeqCst);
            }

            if self.failing_worker == Some(worker) {
                return Err(BrokerError::Transport {
                    index: worker,
                    addr: "local".to_string(),
                    message: "injected failure".to_string(),
                });
            }

            let band = worker::compute_band(&request.grid, RowBand::new(request.start_y, request.end_y))?;
            Ok(band)
        }
    }

    fn shutdown_workers(&self) -> impl Future<Output = usize> + Send {
        async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;

    fn request(grid: Grid, start_y: usize, end_y: usize) -> ComputeBandRequest {
        ComputeBandRequest {
            width: grid.width(),
            height: grid.height(),
            grid: Arc::new(grid),
            start_y,
            end_y,
        }
    }

    #[test]
    fn test_check_band_shape() {
        let req = request(Grid::new(5, 6).unwrap(), 2, 4);
        assert!(check_band_shape(&req, &Grid::new(5, 2).unwrap()).is_ok());
        assert!(check_band_shape(&req, &Grid::new(5, 3).unwrap()).is_err());
        assert!(check_band_shape(&req, &Grid::new(4, 2).unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_local_dispatcher_computes_band() {
        let grid = Grid::with_alive(5, 5, &[Cell::new(1, 2), Cell::new(2, 2), Cell::new(3, 2)]).unwrap();
        let dispatcher = LocalDispatcher::new(2);

        // Blinker flips to vertical; rows 1..3 hold its top two cells
        let band = dispatcher.compute_band(1, request(grid, 1, 3)).await.unwrap();
        assert_eq!(band.alive_cells(), vec![Cell::new(2, 0), Cell::new(2, 1)]);
        assert_eq!(dispatcher.calls(1), 1);
        assert_eq!(dispatcher.calls(0), 0);
    }

    #[tokio::test]
    async fn test_local_dispatcher_injected_failure() {
        let dispatcher = LocalDispatcher::new(2).with_failing_worker(0);
        let err = dispatcher
            .compute_band(0, request(Grid::new(3, 3).unwrap(), 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_remote_dispatcher_unreachable_worker() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dispatcher = RemoteDispatcher::new(
            vec![addr],
            Duration::from_millis(500),
            Duration::from_secs(2),
        );
        let err = dispatcher
            .compute_band(0, request(Grid::new(3, 3).unwrap(), 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Transport { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_remote_dispatcher_times_out_silent_worker() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let dispatcher = RemoteDispatcher::new(
            vec![addr],
            Duration::from_millis(500),
            Duration::from_millis(200),
        );
        let err = dispatcher
            .compute_band(0, request(Grid::new(3, 3).unwrap(), 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { index: 0, timeout_ms: 200, .. }));
    }

    #[tokio::test]
    async fn test_remote_shutdown_is_best_effort() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dispatcher = RemoteDispatcher::new(
            vec![dead.clone(), dead],
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        // Both fail, neither aborts the broadcast
        assert_eq!(dispatcher.shutdown_workers().await, 0);
    }
}
