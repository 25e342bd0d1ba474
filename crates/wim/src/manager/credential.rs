use std::slice;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use wim_apdu_core::CardTransport;

use super::{CredentialManager, Outcome};
use crate::dn;
use crate::pkcs15::certificate_record;
use crate::session::CardSession;
use crate::space::FreeSpace;
use crate::tlv::Tlv;
use crate::types::{Certificate, CertificateDirectory, Path};
use crate::ui::{Confirmation, UserInterface};
use crate::update::{DirectoryImage, PendingUpdate};
use crate::x509::X509;
use crate::{Error, Result};

impl<U: UserInterface> CredentialManager<U> {
    /// Store a certificate chain whose leaf belongs to a key on the card
    ///
    /// `chain` runs from the leaf towards the root. A self-signed root is not
    /// stored unless it is the only certificate, and CA certificates already
    /// on the card are not stored twice. Returns [`Outcome::Skip`] when no key
    /// on the card matches the leaf.
    #[instrument(level = "debug", skip_all, fields(label = label, links = chain.len()))]
    pub fn add_credential<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        label: &str,
        chain: &[Tlv],
        seen_key_ids: &mut Vec<Bytes>,
    ) -> Result<Outcome> {
        if chain.is_empty() {
            return Err(Error::InvalidChain("empty certificate chain"));
        }
        let views = chain.iter().map(checked).collect::<Result<Vec<_>>>()?;
        if views
            .windows(2)
            .any(|pair| !dn::compare(pair[0].issuer(), pair[1].subject()))
        {
            return Err(Error::InvalidChain(
                "issuer does not match the next certificate's subject",
            ));
        }
        let hashes = views
            .iter()
            .map(X509::public_key_hash)
            .collect::<Result<Vec<_>>>()?;

        let keys = session.load_private_keys()?;
        if !keys.iter().any(|key| key.id == hashes[0]) {
            info!("Certificate does not belong to a key on this card");
            return Ok(Outcome::Skip);
        }

        let existing = session.load_certificates(true, true)?;
        if existing.iter().any(|c| c.label == label) {
            warn!("Label already in use");
            return Err(Error::DuplicateCredential);
        }
        let on_card = |view: &X509<'_>| {
            existing
                .iter()
                .filter_map(|c| c.parsed.as_ref())
                .filter_map(|parsed| X509::new(parsed).ok())
                .any(|stored| stored.same_issuer_and_serial(view))
        };
        if on_card(&views[0]) {
            warn!("Certificate already on the card");
            return Err(Error::DuplicateCredential);
        }

        let mut links = views.len();
        if links > 1 && views[links - 1].is_self_issued() {
            debug!("Leaving out the self-signed root");
            links -= 1;
        }

        let user_directory = session
            .directory()
            .certificates
            .first()
            .cloned()
            .ok_or(Error::DirectoryFull)?;
        let ca_directory = session
            .directory()
            .useful_certificates
            .first()
            .cloned()
            .unwrap_or_else(|| user_directory.clone());

        let mut pending = PendingUpdate::new();
        let unused_space = session.unused_space_path();
        let mut free = FreeSpace::load(session.fs_mut(), &unused_space)?;
        let mut images = Vec::new();
        let mut pins = vec![session.primary_pin()?.clone()];

        for (index, view) in views.iter().enumerate().take(links) {
            if index > 0 && on_card(view) {
                debug!(link = index, "CA certificate already on the card");
                continue;
            }

            let body = chain[index].der_data();
            let allocation = free.allocate(body.len(), &mut pending)?;
            if let Some(auth_id) = allocation.auth_id {
                if !pins.iter().any(|pin| pin.id == auth_id) {
                    pins.push(session.pin(auth_id).cloned().ok_or(Error::NoPinsFound)?);
                }
            }
            pending.push(
                allocation.location.path.clone(),
                allocation.location.offset as usize,
                body,
            );

            let (record_label, directory) = if index == 0 {
                (label.to_string(), &user_directory)
            } else {
                (format!("certificate # {index}"), &ca_directory)
            };
            let record = certificate_record(
                &record_label,
                &hashes[index],
                hashes.get(index + 1).map(|hash| &hash[..]),
                index > 0,
                &allocation.location,
            );
            let header = image_for(&mut images, session, directory)?
                .place(&record.der_data(), &mut pending)?;
            debug!(link = index, body = %allocation.location, %header, "Certificate placed");
        }

        if !self.verify_pins(session, &pins)? {
            info!("Adding credential cancelled");
            return Ok(Outcome::Cancelled);
        }
        pending.commit(session.fs_mut())?;

        seen_key_ids.retain(|id| *id != hashes[0]);
        info!(key = %hex::encode_upper(&hashes[0]), "Credential added");
        Ok(Outcome::Success)
    }

    /// Remove the certificate identified by `issuer_and_serial`
    ///
    /// CA certificates above it go too, up to the first one another
    /// certificate on the card still depends on. `label` is informational.
    #[instrument(level = "debug", skip_all, fields(label = label))]
    pub fn remove_credential<T: CardTransport>(
        &mut self,
        session: &mut CardSession<T>,
        label: &str,
        issuer_and_serial: &Tlv,
    ) -> Result<Outcome> {
        let certificates = session.load_certificates(true, false)?;
        let views: Vec<Option<X509<'_>>> = certificates
            .iter()
            .map(|c| c.parsed.as_ref().and_then(|p| X509::new(p).ok()))
            .collect();

        let Some((target, view)) = views.iter().enumerate().find_map(|(index, view)| {
            view.filter(|v| v.issuer_and_serial().matches(issuer_and_serial))
                .map(|v| (index, v))
        }) else {
            info!("Certificate not on the card");
            return Ok(Outcome::Skip);
        };
        if certificates[target].label != label {
            debug!(found = %certificates[target].label, "Label differs");
        }

        let removed = removal_chain(&certificates, &views, target);
        let mut prompt = format!("Label: {}\n{view}", certificates[target].label);
        if removed.len() > 1 {
            prompt.push_str(&format!(
                "\n{} issuing certificate(s) will be removed as well",
                removed.len() - 1
            ));
        }
        if self.ui.show_message("Remove certificate", &prompt, true) == Confirmation::Cancelled {
            info!("Removal cancelled");
            return Ok(Outcome::Cancelled);
        }

        let pin = session.primary_pin()?.clone();
        let mut pending = PendingUpdate::new();
        let unused_space = session.unused_space_path();
        let mut free = FreeSpace::load(session.fs_mut(), &unused_space)?;
        let mut images = Vec::new();
        for &index in &removed {
            let certificate = &certificates[index];
            free.release(&certificate.body, pin.id, &mut pending)?;
            image_for(&mut images, session, &certificate.header.path)?
                .release(&certificate.header, &mut pending)?;
            debug!(label = %certificate.label, body = %certificate.body, "Certificate released");
        }

        if !self.verify_pins(session, slice::from_ref(&pin))? {
            info!("Removal cancelled");
            return Ok(Outcome::Cancelled);
        }
        pending.commit(session.fs_mut())?;
        info!(count = removed.len(), "Credential removed");
        Ok(Outcome::Success)
    }
}

/// Decoded view of a chain link, with names and validity readable
fn checked(certificate: &Tlv) -> Result<X509<'_>> {
    let view = X509::new(certificate).map_err(|_| Error::InvalidChain("not an X.509 certificate"))?;
    dn::name_to_string(view.subject()).map_err(|_| Error::InvalidChain("unreadable subject"))?;
    dn::name_to_string(view.issuer()).map_err(|_| Error::InvalidChain("unreadable issuer"))?;
    view.not_before()
        .and(view.not_after())
        .map_err(|_| Error::InvalidChain("unreadable validity"))?;
    Ok(view)
}

/// Certificate on the card that issued certificate `index`
fn issuer_of(
    certificates: &[Certificate],
    views: &[Option<X509<'_>>],
    index: usize,
) -> Option<usize> {
    let view = views[index]?;
    if view.is_self_issued() {
        return None;
    }
    let by_key = certificates[index].issuer_id.as_ref().and_then(|issuer_id| {
        certificates
            .iter()
            .position(|c| c.id == *issuer_id)
            .filter(|found| *found != index)
    });
    by_key.or_else(|| {
        views.iter().enumerate().position(|(other, candidate)| {
            other != index && candidate.is_some_and(|c| dn::compare(view.issuer(), c.subject()))
        })
    })
}

/// `target` followed by the CA certificates removed along with it
fn removal_chain(
    certificates: &[Certificate],
    views: &[Option<X509<'_>>],
    target: usize,
) -> Vec<usize> {
    let mut chain = vec![target];
    let mut current = target;
    while let Some(issuer) = issuer_of(certificates, views, current) {
        if chain.contains(&issuer) || certificates[issuer].directory != CertificateDirectory::Useful
        {
            break;
        }
        let shared = (0..certificates.len()).any(|other| {
            !chain.contains(&other)
                && other != issuer
                && issuer_of(certificates, views, other) == Some(issuer)
        });
        if shared {
            debug!(label = %certificates[issuer].label, "CA certificate still in use");
            break;
        }
        chain.push(issuer);
        current = issuer;
    }
    chain
}

/// Image of the directory file at `path`, loaded on first use
fn image_for<'i, T: CardTransport>(
    images: &'i mut Vec<DirectoryImage>,
    session: &mut CardSession<T>,
    path: &Path,
) -> Result<&'i mut DirectoryImage> {
    let index = match images.iter().position(|image| image.path() == path) {
        Some(index) => index,
        None => {
            images.push(DirectoryImage::load(session.fs_mut(), path)?);
            images.len() - 1
        }
    };
    Ok(&mut images[index])
}
