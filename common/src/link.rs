use std::net::IpAddr;

use thiserror::Error;

use crate::{
    retry::{Delay, PollRetry},
    types::ConnectivityState,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("association failed: {0}")]
    Association(String),
    #[error("association did not complete")]
    NotAssociated,
}

pub trait Link {
    fn is_connected(&mut self) -> bool;

    // May return before the link is up.
    fn associate(&mut self) -> Result<(), LinkError>;

    fn local_address(&mut self) -> Option<IpAddr>;

    fn state(&mut self) -> ConnectivityState {
        self.is_connected().into()
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn is_connected(&mut self) -> bool {
        (**self).is_connected()
    }

    fn associate(&mut self) -> Result<(), LinkError> {
        (**self).associate()
    }

    fn local_address(&mut self) -> Option<IpAddr> {
        (**self).local_address()
    }
}

/// Blocks until `link` is associated. Never returns if the access point
/// never accepts the node.
pub fn connect<L, D>(link: &mut L, policy: &PollRetry, delay: &mut D)
where
    L: Link + ?Sized,
    D: Delay + ?Sized,
{
    log::info!("connecting to wifi...");
    let ((), attempts) = policy.run(delay, || {
        if !link.is_connected() {
            link.associate()?;
        }
        if link.is_connected() {
            Ok(())
        } else {
            Err(LinkError::NotAssociated)
        }
    });

    match link.local_address() {
        Some(address) => {
            log::info!("wifi connected after {attempts} attempt(s); ip address {address}")
        }
        None => log::info!("wifi connected after {attempts} attempt(s)"),
    }
}
