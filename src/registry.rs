//! Service registry program.
//!
//! One `ServiceAccount` per `(owner, service_type)`, created by `register`,
//! mutated in place by its owner, never deleted. Discovery scans the
//! program's accounts instead of keeping an index.

use tracing::info;

use crate::address::{service_address, Address, Identity, ProgramId};
use crate::error::ProtocolError;
use crate::instruction::{decode_instruction, RegistryInstruction};
use crate::ledger::{AccountFilter, InvokeContext, KeyedAccount, Program};
use crate::state::{
    AccountData, ServiceAccount, MAX_ENDPOINT_LEN, MAX_SERVICE_TYPE_LEN, SERVICE_TYPE_OFFSET,
};

pub struct RegistryProgram {
    id: ProgramId,
}

impl RegistryProgram {
    pub fn new(id: ProgramId) -> Self {
        Self { id }
    }

    fn register_service(
        &self,
        ctx: &mut InvokeContext<'_>,
        service_type: String,
        price: u64,
        endpoint: String,
    ) -> Result<(), ProtocolError> {
        validate_service_type(&service_type)?;
        validate_endpoint(&endpoint)?;
        validate_price(price)?;

        let owner = ctx.signer();
        let (address, _) = service_address(&self.id, &owner, &service_type)?;
        ctx.require_target(&address)?;

        let space = ServiceAccount::space(&service_type);
        let service = ServiceAccount {
            owner,
            service_type,
            price,
            endpoint,
            is_active: true,
            created_at: ctx.unix_timestamp(),
            reputation: 0,
        };
        ctx.create_account(&owner, &address, space, &service)?;

        info!(%owner, %address, service_type = %service.service_type, price, "service registered");
        Ok(())
    }

    fn update_service(
        &self,
        ctx: &mut InvokeContext<'_>,
        owner: Identity,
        service_type: String,
        price: Option<u64>,
        endpoint: Option<String>,
    ) -> Result<(), ProtocolError> {
        let (address, mut service) = self.load_owned(ctx, &owner, &service_type)?;

        if let Some(price) = price {
            validate_price(price)?;
            service.price = price;
        }
        if let Some(endpoint) = endpoint {
            validate_endpoint(&endpoint)?;
            service.endpoint = endpoint;
        }
        ctx.store(&address, &service)?;

        info!(
            %owner,
            %address,
            price = service.price,
            endpoint = %service.endpoint,
            "service updated"
        );
        Ok(())
    }

    fn deactivate_service(
        &self,
        ctx: &mut InvokeContext<'_>,
        owner: Identity,
        service_type: String,
    ) -> Result<(), ProtocolError> {
        let (address, mut service) = self.load_owned(ctx, &owner, &service_type)?;
        service.is_active = false;
        ctx.store(&address, &service)?;

        info!(%owner, %address, "service deactivated");
        Ok(())
    }

    /// Resolve the entry for `(owner, service_type)` and check that the
    /// signer is its recorded owner.
    fn load_owned(
        &self,
        ctx: &InvokeContext<'_>,
        owner: &Identity,
        service_type: &str,
    ) -> Result<(Address, ServiceAccount), ProtocolError> {
        validate_service_type(service_type)?;
        let (address, _) = service_address(&self.id, owner, service_type)?;
        ctx.require_target(&address)?;

        let service: ServiceAccount = ctx.load(&address)?;
        if service.owner != ctx.signer() {
            return Err(ProtocolError::Unauthorized {
                expected: service.owner,
                actual: ctx.signer(),
            });
        }
        Ok((address, service))
    }
}

impl Program for RegistryProgram {
    fn id(&self) -> ProgramId {
        self.id
    }

    fn name(&self) -> &'static str {
        "registry"
    }

    fn process(&self, ctx: &mut InvokeContext<'_>, data: &[u8]) -> Result<(), ProtocolError> {
        match decode_instruction::<RegistryInstruction>(data)? {
            RegistryInstruction::RegisterService {
                service_type,
                price,
                endpoint,
            } => {
                info!("Instruction: RegisterService");
                self.register_service(ctx, service_type, price, endpoint)
            }
            RegistryInstruction::UpdateService {
                owner,
                service_type,
                price,
                endpoint,
            } => {
                info!("Instruction: UpdateService");
                self.update_service(ctx, owner, service_type, price, endpoint)
            }
            RegistryInstruction::DeactivateService {
                owner,
                service_type,
            } => {
                info!("Instruction: DeactivateService");
                self.deactivate_service(ctx, owner, service_type)
            }
        }
    }
}

pub fn validate_service_type(service_type: &str) -> Result<(), ProtocolError> {
    if service_type.len() > MAX_SERVICE_TYPE_LEN {
        return Err(ProtocolError::ServiceTypeTooLong {
            len: service_type.len(),
            max: MAX_SERVICE_TYPE_LEN,
        });
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ProtocolError> {
    if endpoint.len() > MAX_ENDPOINT_LEN {
        return Err(ProtocolError::EndpointTooLong {
            len: endpoint.len(),
            max: MAX_ENDPOINT_LEN,
        });
    }
    Ok(())
}

fn validate_price(price: u64) -> Result<(), ProtocolError> {
    if price == 0 {
        return Err(ProtocolError::InvalidPrice);
    }
    Ok(())
}

/// Filters narrowing a program-account scan to service entries, and to one
/// exact service type when given.
pub fn discovery_filters(service_type: Option<&str>) -> Vec<AccountFilter> {
    let mut filters = vec![AccountFilter::Memcmp {
        offset: 0,
        bytes: ServiceAccount::discriminator().to_vec(),
    }];
    if let Some(service_type) = service_type {
        let mut bytes = (service_type.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(service_type.as_bytes());
        filters.push(AccountFilter::Memcmp {
            offset: SERVICE_TYPE_OFFSET,
            bytes,
        });
    }
    filters
}

/// Decode scanned accounts into the active entries of the requested type,
/// ordered by address. Undecodable accounts are skipped.
pub fn active_services(
    accounts: Vec<KeyedAccount>,
    service_type: Option<&str>,
) -> Vec<ServiceAccount> {
    let mut services: Vec<_> = accounts
        .into_iter()
        .filter_map(|keyed| {
            ServiceAccount::decode(&keyed.address, &keyed.account.data)
                .ok()
                .map(|service| (keyed.address, service))
        })
        .filter(|(_, service)| service.is_active)
        .filter(|(_, service)| service_type.map_or(true, |wanted| service.service_type == wanted))
        .collect();
    services.sort_by_key(|(address, _)| *address);
    services.into_iter().map(|(_, service)| service).collect()
}
