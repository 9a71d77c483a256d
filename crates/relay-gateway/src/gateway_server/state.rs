use super::*;

/// The durable stores living in one data directory.
#[derive(Clone)]
pub struct GatewayStores {
    pub config: Arc<ConfigStore>,
    pub pool: Arc<CredentialPool>,
    pub registry: Arc<ClientKeyRegistry>,
    pub refresh_records: Arc<RefreshRecords>,
    pub session_endpoints: Arc<SessionEndpointRecords>,
}

impl GatewayStores {
    /// Opens every store under `data_dir`, creating the directory if needed.
    pub fn open(defaults: GatewaySettings, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let config = ConfigStore::open(defaults, data_dir)
            .with_context(|| format!("failed to open config store in {}", data_dir.display()))?;
        let pool = CredentialPool::open(data_dir)
            .with_context(|| format!("failed to open credential pool in {}", data_dir.display()))?;
        let registry = ClientKeyRegistry::open(data_dir).with_context(|| {
            format!("failed to open client key registry in {}", data_dir.display())
        })?;
        let refresh_records = RefreshRecords::open(data_dir.join(REFRESH_MAP_FILE))
            .context("failed to open refresh records")?;
        let session_endpoints = SessionEndpointRecords::open(data_dir.join(WSS_MAP_FILE))
            .context("failed to open session endpoint records")?;
        Ok(Self {
            config: Arc::new(config),
            pool: Arc::new(pool),
            registry: Arc::new(registry),
            refresh_records: Arc::new(refresh_records),
            session_endpoints: Arc::new(session_endpoints),
        })
    }
}

/// Shared handler state built once at startup.
pub struct GatewayState {
    pub(super) stores: GatewayStores,
    pub(super) dispatcher: Dispatcher,
    pub(super) api_prefix: Option<String>,
}

impl GatewayState {
    pub fn new(
        stores: GatewayStores,
        factory: Arc<dyn SessionFactory>,
        selector: CredentialSelector,
        api_prefix: Option<String>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&stores.config),
            Arc::clone(&stores.pool),
            Arc::clone(&stores.registry),
            factory,
            selector,
        );
        Self {
            stores,
            dispatcher,
            api_prefix: api_prefix
                .map(|prefix| prefix.trim_matches('/').to_string())
                .filter(|prefix| !prefix.is_empty()),
        }
    }

    pub fn stores(&self) -> &GatewayStores {
        &self.stores
    }

    /// Admin base path, `/{prefix}/admin` or `/admin`.
    pub fn admin_base_path(&self) -> String {
        match &self.api_prefix {
            Some(prefix) => format!("/{prefix}/admin"),
            None => "/admin".to_string(),
        }
    }

    pub(super) fn admin_redirect(&self, status: StatusCode, tab: &str) -> Response {
        let location = format!("{}#{tab}", self.admin_base_path());
        match HeaderValue::from_str(&location) {
            Ok(location) => (status, [(LOCATION, location)]).into_response(),
            Err(error) => GatewayApiError::admin(
                StatusCode::INTERNAL_SERVER_ERROR,
                "admin_redirect_failed",
                format!("invalid admin redirect location '{location}': {error}"),
            )
            .into_response(),
        }
    }

    pub(super) fn collect_admin_state(&self) -> AdminStateView {
        let settings = self.stores.config.snapshot();
        AdminStateView {
            api_prefix: self.api_prefix.clone(),
            accounts: self.stores.pool.rows().as_ref().clone(),
            users: self.stores.registry.rows().as_ref().clone(),
            config: AdminConfigView::from(settings.as_ref()),
            tokens_count: self.stores.pool.available().len(),
            error_tokens: self.stores.pool.errored().as_ref().clone(),
            refresh_records: self.stores.refresh_records.len(),
            session_endpoints: self.stores.session_endpoints.len(),
        }
    }
}
