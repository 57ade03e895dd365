//! Wallets and the devnet genesis account registry.

/// Key name reserved for the pre-funded genesis faucet.
pub const FAUCET_KEY_NAME: &str = "faucet";

/// A named key with its resolved on-chain address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    key_name: String,
    address: String,
}

impl Wallet {
    /// Pair a key name with its address.
    pub fn new(key_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            address: address.into(),
        }
    }

    /// The key name this wallet signs as.
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// The wallet's address in the chain's native format.
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// One account baked into the devnet genesis.
#[derive(Debug, Clone, Copy)]
pub struct GenesisAccount {
    /// Checksummed hex address.
    pub address: &'static str,
    /// Hex-encoded private key. These are the well-known anvil developer
    /// keys; they hold no value anywhere but a throwaway devnet.
    pub private_key: &'static str,
}

/// Accounts derived from anvil's default test mnemonic, in derivation order.
/// Account 0 is reserved as the faucet.
const ANVIL_GENESIS_ACCOUNTS: &[GenesisAccount] = &[
    GenesisAccount {
        address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        private_key: "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    },
    GenesisAccount {
        address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
        private_key: "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
    },
    GenesisAccount {
        address: "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
        private_key: "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
    },
    GenesisAccount {
        address: "0x90F79bf6EB2c4f870365E785982E1f101E93b906",
        private_key: "0x7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6",
    },
    GenesisAccount {
        address: "0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65",
        private_key: "0x47e179ec197488593b187f80a00eb0da91f1b9d0b13f8733639f19c30a34926a",
    },
    GenesisAccount {
        address: "0x9965507D1a55bcC2695C58ba16FB37d819B0A4dc",
        private_key: "0x8b3a350cf5c34c9194ca85829a2df0ec3153be0318b5e2d3348e872092edffba",
    },
    GenesisAccount {
        address: "0x976EA74026E726554dB657fA54763abd0C3a0aa9",
        private_key: "0x92db14e403b83dfe3df233f83dfa3a0d7096f21ca9b0d6d6b8d88b2b4ec1564e",
    },
    GenesisAccount {
        address: "0x14dC79964da2C08b23698B3D3cc7Ca32193d9955",
        private_key: "0x4bbbf85ce3377467afe5d46f804f221813b2bb87f24d81f60f1fcdbf7cbf4356",
    },
    GenesisAccount {
        address: "0x23618e81E3f5cdF7f54C3d65f7FBc0aBf5B21E8f",
        private_key: "0xdbda1821b80551c9d65939329250298aa3472ba22feea921c0cf5d620ea67b97",
    },
    GenesisAccount {
        address: "0xa0Ee7A142d267C1f36714E4a8F75612F20a79720",
        private_key: "0x2a871d0798f97d79848a013d4936a73bf4cc922c825d33c1cf7073dff6d409c6",
    },
];

/// The set of pre-funded accounts known at chain-config time. The faucet's
/// key material comes from here rather than the node keystore, so faucet
/// wallets can be handed out before any key has been derived at runtime.
#[derive(Debug, Clone, Default)]
pub struct GenesisWallets;

impl GenesisWallets {
    /// New registry over the default devnet accounts.
    pub fn new() -> Self {
        Self
    }

    /// The faucet wallet (genesis account 0) under the given key name.
    pub fn faucet(&self, key_name: &str) -> Wallet {
        Wallet::new(key_name, ANVIL_GENESIS_ACCOUNTS[0].address)
    }

    /// The faucet's private key, for tools that sign directly.
    pub fn faucet_private_key(&self) -> &'static str {
        ANVIL_GENESIS_ACCOUNTS[0].private_key
    }

    /// A genesis account by derivation index.
    pub fn account(&self, index: usize) -> Option<&'static GenesisAccount> {
        ANVIL_GENESIS_ACCOUNTS.get(index)
    }

    /// Number of pre-funded genesis accounts.
    pub fn len(&self) -> usize {
        ANVIL_GENESIS_ACCOUNTS.len()
    }

    /// Whether the registry is empty (it never is for anvil devnets).
    pub fn is_empty(&self) -> bool {
        ANVIL_GENESIS_ACCOUNTS.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faucet_is_account_zero() {
        let wallets = GenesisWallets::new();
        let faucet = wallets.faucet(FAUCET_KEY_NAME);
        assert_eq!(faucet.key_name(), FAUCET_KEY_NAME);
        assert_eq!(faucet.address(), wallets.account(0).unwrap().address);
    }

    #[test]
    fn genesis_accounts_match_the_default_account_count() {
        // anvil boots with --accounts 10
        assert_eq!(GenesisWallets::new().len(), 10);
    }

    #[test]
    fn genesis_addresses_are_distinct() {
        let wallets = GenesisWallets::new();
        for i in 0..wallets.len() {
            for j in (i + 1)..wallets.len() {
                assert_ne!(
                    wallets.account(i).unwrap().address,
                    wallets.account(j).unwrap().address
                );
            }
        }
    }
}
